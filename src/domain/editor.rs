use uuid::Uuid;

/// Stable identity of an authenticated caller, as resolved by an
/// `Authenticator`. This is opaque to the core; it is only ever mapped to an
/// `Editor` through `EditorStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(String);

impl CallerId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
}

impl AsRef<str> for CallerId {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for CallerId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Editor {
    /// Internal id, referenced by `Newsletter::editor_id`
    pub id: Uuid,
    /// The identity the authenticator resolves to (currently the username)
    pub auth_id: String,
}
