use std::fmt;

use uuid::Uuid;

/// Name the container is created under and watched by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerIdentity(String);

impl ContainerIdentity {
    /// A caller-supplied name is used verbatim; otherwise a fresh v4 UUID.
    pub fn assign(requested: Option<&str>) -> Self {
        match requested {
            Some(name) if !name.is_empty() => Self(name.to_string()),
            _ => Self(Uuid::new_v4().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
