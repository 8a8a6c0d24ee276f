//! Configuration storage collaborator.
//!
//! The broker never stores settings itself. Reads and writes go to the
//! registered config service; without one, [`DummyConfig`] answers.

use imbus_types::{ConfigMethod, Method, ReturnValue};
use tracing::trace;

use crate::connection::ConnId;
use crate::error::BusError;
use crate::outbox::Outbox;

/// Outcome of a config request.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigAnswer {
    /// Answered in-process.
    Ready(Result<ReturnValue, BusError>),
    /// Relayed to a remote service; the reply arrives under `serial`.
    Pending { conn: ConnId, serial: u32 },
}

pub trait ConfigService: Send {
    /// Connection hosting the service, if it is remote.
    fn owner(&self) -> Option<ConnId>;

    fn request(&mut self, out: &mut Outbox, method: ConfigMethod) -> ConfigAnswer;
}

/// Stand-in used while no config service is registered.
#[derive(Debug, Default)]
pub struct DummyConfig;

impl ConfigService for DummyConfig {
    fn owner(&self) -> Option<ConnId> {
        None
    }

    fn request(&mut self, _out: &mut Outbox, method: ConfigMethod) -> ConfigAnswer {
        trace!(?method, "no config service");
        ConfigAnswer::Ready(match method {
            ConfigMethod::GetValue { section, name } => {
                Err(BusError::NoSuchName(format!("{section}/{name}")))
            }
            ConfigMethod::GetValues { .. } => Ok(ReturnValue::Values(Vec::new())),
            ConfigMethod::SetValue { .. } | ConfigMethod::UnsetValue { .. } => {
                Ok(ReturnValue::Unit)
            }
        })
    }
}

/// A config service living on another connection.
#[derive(Debug)]
pub struct RemoteConfig {
    conn: ConnId,
    path: String,
}

impl RemoteConfig {
    pub fn new(conn: ConnId, path: impl Into<String>) -> Self {
        Self {
            conn,
            path: path.into(),
        }
    }
}

impl ConfigService for RemoteConfig {
    fn owner(&self) -> Option<ConnId> {
        Some(self.conn)
    }

    fn request(&mut self, out: &mut Outbox, method: ConfigMethod) -> ConfigAnswer {
        let serial = out.call(self.conn, &self.path, Method::Config(method));
        ConfigAnswer::Pending {
            conn: self.conn,
            serial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imbus_types::Value;

    #[test]
    fn dummy_config_answers_locally() {
        let mut config = DummyConfig;
        let mut out = Outbox::new();
        assert_eq!(
            config.request(
                &mut out,
                ConfigMethod::GetValue {
                    section: "general".into(),
                    name: "trigger".into()
                }
            ),
            ConfigAnswer::Ready(Err(BusError::NoSuchName("general/trigger".into())))
        );
        assert_eq!(
            config.request(
                &mut out,
                ConfigMethod::GetValues {
                    section: "general".into()
                }
            ),
            ConfigAnswer::Ready(Ok(ReturnValue::Values(Vec::new())))
        );
        assert_eq!(
            config.request(
                &mut out,
                ConfigMethod::SetValue {
                    section: "general".into(),
                    name: "trigger".into(),
                    value: Value::Str("Shift+space".into())
                }
            ),
            ConfigAnswer::Ready(Ok(ReturnValue::Unit))
        );
        assert!(out.is_empty());
    }

    #[test]
    fn remote_config_relays() {
        let mut config = RemoteConfig::new(ConnId(7), "/org/example/Config");
        let mut out = Outbox::new();
        let answer = config.request(
            &mut out,
            ConfigMethod::GetValues {
                section: "engine/anthy".into(),
            },
        );
        let (to, msg) = out.drain().remove(0);
        assert_eq!(to, ConnId(7));
        assert_eq!(
            answer,
            ConfigAnswer::Pending {
                conn: ConnId(7),
                serial: msg.serial
            }
        );
    }
}
