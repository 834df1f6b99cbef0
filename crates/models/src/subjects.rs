use serde::{Deserialize, Serialize};

/// Delimiter separating a context qualifier from the subject name.
pub const CONTEXT_DELIMITER: char = ':';
/// Prefix which introduces a context-qualified subject name.
pub const CONTEXT_PREFIX: &str = ":.";
/// The unnamed default context.
pub const DEFAULT_CONTEXT: &str = ".";
/// Wildcard matching every context of a tenant.
pub const CONTEXT_WILDCARD: &str = ":*:";
/// The single-tenant default. Multi-tenant deployments layer tenancy on top
/// of the registry; the durable records carry the tenant for that purpose.
pub const DEFAULT_TENANT: &str = "default";

/// A subject name split into its context qualifier and bare name.
///
/// Subjects may be qualified with a context encoded into the string itself,
/// as in `:.production:orders-value`. An unqualified name lives in the
/// default context. Contexts partition the subject namespace; schema ids
/// remain global across contexts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedSubject {
    /// Dot-prefixed context name, `.` for the default context.
    pub context: String,
    /// The bare subject name within the context.
    pub name: String,
}

impl QualifiedSubject {
    /// Parse a possibly-qualified subject string.
    pub fn parse(subject: &str) -> Self {
        if let Some(rest) = subject.strip_prefix(CONTEXT_PREFIX) {
            // `:.ctx:name`. A missing closing delimiter means the whole
            // remainder is the context and the subject name is empty.
            match rest.split_once(CONTEXT_DELIMITER) {
                Some((ctx, name)) => Self {
                    context: format!(".{ctx}"),
                    name: name.to_string(),
                },
                None => Self {
                    context: format!(".{rest}"),
                    name: String::new(),
                },
            }
        } else {
            Self {
                context: DEFAULT_CONTEXT.to_string(),
                name: subject.to_string(),
            }
        }
    }

    /// Re-qualify a bare name into the given context.
    pub fn qualify(context: &str, name: &str) -> Self {
        Self {
            context: context.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_default_context(&self) -> bool {
        self.context == DEFAULT_CONTEXT
    }

    /// Render back into the encoded string form.
    pub fn to_qualified_string(&self) -> String {
        if self.is_default_context() {
            self.name.clone()
        } else {
            format!("{CONTEXT_DELIMITER}{}{CONTEXT_DELIMITER}{}", self.context, self.name)
        }
    }
}

impl std::fmt::Display for QualifiedSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_qualified_string())
    }
}

/// The context of a possibly-qualified subject string.
pub fn context_of(subject: &str) -> String {
    QualifiedSubject::parse(subject).context
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_subject_qualification() {
        let q = QualifiedSubject::parse("orders-value");
        assert_eq!(q.context, ".");
        assert_eq!(q.name, "orders-value");
        assert!(q.is_default_context());
        assert_eq!(q.to_qualified_string(), "orders-value");

        let q = QualifiedSubject::parse(":.production:orders-value");
        assert_eq!(q.context, ".production");
        assert_eq!(q.name, "orders-value");
        assert_eq!(q.to_qualified_string(), ":.production:orders-value");

        // Context-only qualification, as used for per-context defaults.
        let q = QualifiedSubject::parse(":.production:");
        assert_eq!(q.context, ".production");
        assert_eq!(q.name, "");

        // Missing closing delimiter.
        let q = QualifiedSubject::parse(":.production");
        assert_eq!(q.context, ".production");
        assert_eq!(q.name, "");
    }
}
