use pgsink_core::{Error, Result};

/// Environment variable marking a process as a worker. Its value is the
/// worker index assigned by the coordinator.
pub const WORKER_ID_ENV: &str = "PGSINK_WORKER_ID";

/// Which side of the fleet the current process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Worker { id: usize },
}

impl Role {
    /// Reads [`WORKER_ID_ENV`] from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the variable is set but is not a worker
    /// index.
    pub fn detect() -> Result<Self> {
        Self::from_env_value(std::env::var(WORKER_ID_ENV).ok().as_deref())
    }

    /// # Errors
    ///
    /// Returns [`Error::Spawn`] for a value that does not parse as an index.
    pub fn from_env_value(value: Option<&str>) -> Result<Self> {
        let Some(raw) = value else {
            return Ok(Self::Coordinator);
        };
        raw.trim()
            .parse()
            .map(|id| Self::Worker { id })
            .map_err(|_| Error::Spawn {
                reason: format!("{WORKER_ID_ENV}=`{raw}` is not a worker index"),
            })
    }

    pub const fn is_coordinator(&self) -> bool {
        matches!(self, Self::Coordinator)
    }

    /// Short process label for log lines.
    pub fn label(&self) -> String {
        match self {
            Self::Coordinator => "coordinator".to_string(),
            Self::Worker { id } => format!("worker {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_from_env_value() {
        assert_eq!(Role::from_env_value(None), Ok(Role::Coordinator));
        assert_eq!(Role::from_env_value(Some("3")), Ok(Role::Worker { id: 3 }));
        assert_eq!(Role::from_env_value(Some(" 4\n")), Ok(Role::Worker { id: 4 }));
        assert!(Role::from_env_value(None).unwrap().is_coordinator());
        assert_eq!(Role::Worker { id: 2 }.label(), "worker 2");
    }

    #[test]
    fn malformed_worker_id_is_rejected() {
        for raw in ["x", "", "-1"] {
            assert!(matches!(
                Role::from_env_value(Some(raw)),
                Err(Error::Spawn { .. })
            ));
        }
    }
}
