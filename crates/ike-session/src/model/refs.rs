//! Refs: the workloads a Session works on

use std::collections::BTreeMap;
use std::fmt;

use ike_common::crd::{RefSpec, RefStatus};
use ike_common::kube_utils::short_hash;

/// Strategy that reuses the original workload instead of cloning it
pub const STRATEGY_EXISTING: &str = "existing";

/// Optional kind plus name, parsed from `kind/name` or a bare name
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KindName {
    /// Lowercased kind, empty when the ref did not name one
    pub kind: String,
    /// Lowercased object name
    pub name: String,
}

impl KindName {
    /// Parse `kind/name` or `name`; input is trimmed and lowercased
    pub fn parse(expression: &str) -> Self {
        let trimmed = expression.trim().to_lowercase();
        let parts: Vec<&str> = trimmed.split('/').collect();
        match parts.as_slice() {
            [kind, name] => Self {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            _ => Self {
                kind: String::new(),
                name: trimmed,
            },
        }
    }

    /// True when no kind was given or it names `kind`
    ///
    /// Accepts the short forms `deploy` and `dc`.
    pub fn supports_kind(&self, kind: &str) -> bool {
        if self.kind.is_empty() {
            return true;
        }
        let expanded = match self.kind.as_str() {
            "deploy" => "deployment",
            "dc" => "deploymentconfig",
            other => other,
        };
        expanded.eq_ignore_ascii_case(kind)
    }
}

impl fmt::Display for KindName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.kind, self.name)
        }
    }
}

/// A target of one engine pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ref {
    /// Name as written in the Session spec
    pub name: String,
    /// Parsed form of `name`
    pub kind_name: KindName,
    /// Namespace of the owning Session
    pub namespace: String,
    /// Clone strategy
    pub strategy: String,
    /// Strategy arguments
    pub args: BTreeMap<String, String>,
    /// The pass undoes the ref instead of applying it
    pub deleted: bool,
}

impl Ref {
    /// New forward ref
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        strategy: impl Into<String>,
        args: BTreeMap<String, String>,
    ) -> Self {
        let name = name.into();
        Self {
            kind_name: KindName::parse(&name),
            name,
            namespace: namespace.into(),
            strategy: strategy.into(),
            args,
            deleted: false,
        }
    }

    /// Ref declared in a Session spec
    pub fn from_spec(spec: &RefSpec, namespace: &str) -> Self {
        Self::new(&spec.name, namespace, &spec.strategy, spec.args.clone())
    }

    /// Ref as it was recorded when last applied
    pub fn from_status(status: &RefStatus, namespace: &str) -> Self {
        Self::new(&status.name, namespace, &status.strategy, status.args.clone())
    }

    /// The same ref, marked for removal
    pub fn into_deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// True when the strategy reuses the original workload
    pub fn is_existing(&self) -> bool {
        self.strategy == STRATEGY_EXISTING
    }

    /// Digest over every field that changes what the ref produces
    ///
    /// Args are digested in key order so map ordering never matters.
    pub fn hash(&self) -> String {
        let mut input = format!(
            "kind:{};deleted:{};namespace:{};strategy:{}",
            self.kind_name, self.deleted, self.namespace, self.strategy
        );
        for (key, value) in &self.args {
            input.push_str(&format!(";args[{key}]:{value}"));
        }
        short_hash(&input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    mod kind_name {
        use super::*;

        #[test]
        fn parses_kind_and_name() {
            let kn = KindName::parse(" Deployment/Ratings-V1 ");
            assert_eq!(kn.kind, "deployment");
            assert_eq!(kn.name, "ratings-v1");
            assert_eq!(kn.to_string(), "deployment/ratings-v1");
        }

        #[test]
        fn bare_name_has_no_kind() {
            let kn = KindName::parse("ratings-v1");
            assert!(kn.kind.is_empty());
            assert_eq!(kn.to_string(), "ratings-v1");
        }

        #[test]
        fn more_than_one_slash_is_a_bare_name() {
            let kn = KindName::parse("a/b/c");
            assert!(kn.kind.is_empty());
            assert_eq!(kn.name, "a/b/c");
        }

        #[test]
        fn supports_kind_case_insensitively() {
            assert!(KindName::parse("ratings").supports_kind("Deployment"));
            assert!(KindName::parse("deployment/ratings").supports_kind("Deployment"));
            assert!(!KindName::parse("deployment/ratings").supports_kind("DeploymentConfig"));
        }

        #[test]
        fn short_kinds_are_expanded() {
            assert!(KindName::parse("deploy/ratings").supports_kind("Deployment"));
            assert!(KindName::parse("dc/ratings").supports_kind("DeploymentConfig"));
            assert!(!KindName::parse("dc/ratings").supports_kind("Deployment"));
        }
    }

    mod hash {
        use super::*;

        #[test]
        fn digest_matches_recorded_format() {
            let r = Ref::new("ratings-v1", "bookinfo", "prepared-image", args(&[("image", "x")]));
            let expected = short_hash(
                "kind:ratings-v1;deleted:false;namespace:bookinfo;strategy:prepared-image;args[image]:x",
            );
            assert_eq!(r.hash(), expected);
            assert_eq!(r.hash().len(), 8);
        }

        #[test]
        fn arg_insertion_order_does_not_matter() {
            let mut a = BTreeMap::new();
            a.insert("b".to_string(), "2".to_string());
            a.insert("a".to_string(), "1".to_string());
            let mut b = BTreeMap::new();
            b.insert("a".to_string(), "1".to_string());
            b.insert("b".to_string(), "2".to_string());

            let r1 = Ref::new("ratings", "ns", "telepresence", a);
            let r2 = Ref::new("ratings", "ns", "telepresence", b);
            assert_eq!(r1.hash(), r2.hash());
        }

        #[test]
        fn any_field_change_changes_the_hash() {
            let base = Ref::new("ratings", "ns", "telepresence", args(&[("version", "1")]));
            let variants = [
                Ref::new("ratings", "ns", "prepared-image", args(&[("version", "1")])),
                Ref::new("ratings", "other", "telepresence", args(&[("version", "1")])),
                Ref::new("ratings", "ns", "telepresence", args(&[("version", "2")])),
                Ref::new("reviews", "ns", "telepresence", args(&[("version", "1")])),
                base.clone().into_deleted(),
            ];
            for variant in variants {
                assert_ne!(base.hash(), variant.hash(), "{variant:?}");
            }
        }
    }

    #[test]
    fn builds_from_spec_and_status() {
        let spec = RefSpec {
            name: "Deployment/ratings-v1".to_string(),
            strategy: "prepared-image".to_string(),
            args: args(&[("image", "x:x:x")]),
        };
        let r = Ref::from_spec(&spec, "bookinfo");
        assert_eq!(r.name, "Deployment/ratings-v1");
        assert_eq!(r.kind_name.to_string(), "deployment/ratings-v1");
        assert!(!r.deleted);

        let status = RefStatus {
            name: spec.name.clone(),
            strategy: spec.strategy.clone(),
            args: spec.args.clone(),
            ..Default::default()
        };
        let removed = Ref::from_status(&status, "bookinfo").into_deleted();
        assert!(removed.deleted);
        assert_eq!(removed.kind_name, r.kind_name);
    }

    #[test]
    fn existing_strategy_is_detected() {
        assert!(Ref::new("a", "ns", STRATEGY_EXISTING, BTreeMap::new()).is_existing());
        assert!(!Ref::new("a", "ns", "telepresence", BTreeMap::new()).is_existing());
    }
}
