use std::collections::BTreeSet;

pub const MOVIES_READ: &str = "movies:read";
pub const MOVIES_WRITE: &str = "movies:write";
pub const METRICS_VIEW: &str = "metrics:view";
pub const PERMISSIONS_WRITE: &str = "permissions:write";

/// Every code a user can be granted.
pub const KNOWN_CODES: [&str; 4] = [MOVIES_READ, MOVIES_WRITE, METRICS_VIEW, PERMISSIONS_WRITE];

/// Permission codes held by one user. Codes are a flat, app-global namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Permissions(BTreeSet<String>);

impl Permissions {
    #[must_use]
    pub fn includes(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[must_use]
pub fn is_known_code(code: &str) -> bool {
    KNOWN_CODES.contains(&code)
}
