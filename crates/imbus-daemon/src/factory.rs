//! Registered engine factories and default-engine selection.

use std::collections::HashSet;

use imbus_types::{FactoryEntry, FactoryInfo, FactoryMethod, Method};
use tracing::{debug, info};

use crate::connection::ConnId;
use crate::error::BusError;
use crate::outbox::Outbox;

#[derive(Debug)]
struct Registered {
    conn: ConnId,
    entry: FactoryEntry,
}

/// All factories, in registration order.
///
/// The default factory is the first of the eligible factories ordered by
/// (language, name). The order is computed lazily and cached until the set
/// of factories changes in a way that can affect it.
#[derive(Debug, Default)]
pub struct FactoryRegistry {
    factories: Vec<Registered>,
    registered_conns: HashSet<ConnId>,
    ordered: Option<Vec<String>>,
    preferred: Option<String>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one connection's factories. Each connection registers once.
    pub fn register_factories(
        &mut self,
        conn: ConnId,
        owner: &str,
        paths: &[String],
    ) -> Result<(), BusError> {
        if self.registered_conns.contains(&conn) {
            return Err(BusError::AlreadyRegistered(format!("factories of {owner}")));
        }
        let mut seen = HashSet::new();
        for path in paths {
            if !seen.insert(path.as_str()) || self.factories.iter().any(|f| &f.entry.path == path)
            {
                return Err(BusError::AlreadyRegistered(path.clone()));
            }
        }
        self.registered_conns.insert(conn);
        for path in paths {
            info!(conn = %conn, factory = %path, "factory registered");
            self.factories.push(Registered {
                conn,
                entry: FactoryEntry {
                    path: path.clone(),
                    owner: owner.to_string(),
                    info: None,
                },
            });
        }
        self.ordered = None;
        Ok(())
    }

    /// Ask a factory to describe itself; returns the call serial.
    pub fn request_info(&self, out: &mut Outbox, path: &str) -> Result<u32, BusError> {
        let conn = self.owner_of(path)?;
        Ok(out.call(conn, path, Method::Factory(FactoryMethod::GetInfo)))
    }

    /// Store the `GetInfo` answer of the factory at `path` hosted by `conn`.
    pub fn set_info(&mut self, conn: ConnId, path: &str, info: FactoryInfo) -> bool {
        let Some(f) = self
            .factories
            .iter_mut()
            .find(|f| f.conn == conn && f.entry.path == path)
        else {
            return false;
        };
        debug!(factory = %path, name = %info.name, language = %info.language, "factory info");
        f.entry.info = Some(info);
        self.ordered = None;
        true
    }

    /// Issue `CreateEngine`; the reply carries the new engine's path.
    pub fn create_engine(&self, out: &mut Outbox, path: &str) -> Result<(ConnId, u32), BusError> {
        let conn = self.owner_of(path)?;
        let serial = out.call(conn, path, Method::Factory(FactoryMethod::CreateEngine));
        debug!(factory = %path, serial, "create engine");
        Ok((conn, serial))
    }

    pub fn owner_of(&self, path: &str) -> Result<ConnId, BusError> {
        self.factories
            .iter()
            .find(|f| f.entry.path == path)
            .map(|f| f.conn)
            .ok_or_else(|| BusError::NoSuchFactory(path.to_string()))
    }

    pub fn get(&self, path: &str) -> Result<&FactoryEntry, BusError> {
        self.factories
            .iter()
            .find(|f| f.entry.path == path)
            .map(|f| &f.entry)
            .ok_or_else(|| BusError::NoSuchFactory(path.to_string()))
    }

    pub fn list(&self) -> Vec<FactoryEntry> {
        self.factories.iter().map(|f| f.entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Pin the factory used for new engines.
    pub fn set_preferred(&mut self, path: &str) -> Result<(), BusError> {
        self.get(path)?;
        info!(factory = %path, "preferred factory set");
        self.preferred = Some(path.to_string());
        Ok(())
    }

    /// Path of the factory new engines should come from.
    pub fn get_default_factory(&mut self) -> Option<String> {
        if let Some(preferred) = &self.preferred {
            return Some(preferred.clone());
        }
        if self.ordered.is_none() {
            let mut eligible: Vec<&Registered> =
                self.factories.iter().filter(|f| f.entry.info.is_some()).collect();
            eligible.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
            let ordered: Vec<String> = eligible.iter().map(|f| f.entry.path.clone()).collect();
            debug!(order = ?ordered, "default factory order computed");
            self.ordered = Some(ordered);
        }
        self.ordered.as_ref().and_then(|o| o.first().cloned())
    }

    /// The cached default, without computing it.
    pub fn cached_default(&self) -> Option<&str> {
        self.ordered
            .as_ref()
            .and_then(|o| o.first())
            .map(String::as_str)
    }

    /// Drop every factory `conn` registered; returns their paths.
    pub fn remove_connection(&mut self, conn: ConnId) -> Vec<String> {
        if !self.registered_conns.remove(&conn) {
            return Vec::new();
        }
        let mut removed = Vec::new();
        self.factories.retain(|f| {
            if f.conn == conn {
                removed.push(f.entry.path.clone());
                false
            } else {
                true
            }
        });
        let default_removed = self
            .cached_default()
            .is_some_and(|d| removed.iter().any(|r| r == d));
        if default_removed {
            self.ordered = None;
        } else if let Some(ordered) = &mut self.ordered {
            ordered.retain(|p| !removed.contains(p));
        }
        if self.preferred.as_ref().is_some_and(|p| removed.contains(p)) {
            self.preferred = None;
        }
        if !removed.is_empty() {
            info!(conn = %conn, factories = removed.len(), "factories removed");
        }
        removed
    }
}

fn sort_key(f: &Registered) -> (&str, &str, &str, &str) {
    let (language, name) = f
        .entry
        .info
        .as_ref()
        .map_or(("", ""), |i| (i.language.as_str(), i.name.as_str()));
    (language, name, f.entry.path.as_str(), f.entry.owner.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(reg: &mut FactoryRegistry, conn: u64, path: &str, name: &str, lang: &str) {
        reg.register_factories(ConnId(conn), &format!(":1.{conn}"), &[path.to_string()])
            .unwrap();
        reg.set_info(ConnId(conn), path, FactoryInfo::new(name, lang));
    }

    #[test]
    fn language_orders_before_name() {
        let mut reg = FactoryRegistry::new();
        register(&mut reg, 1, "/f/anthy", "Anthy", "ja");
        register(&mut reg, 2, "/f/xkb", "Xkb", "en");
        assert_eq!(reg.get_default_factory().as_deref(), Some("/f/xkb"));
    }

    #[test]
    fn second_registration_per_connection_fails() {
        let mut reg = FactoryRegistry::new();
        reg.register_factories(ConnId(1), ":1.1", &["/f/a".into()])
            .unwrap();
        assert!(matches!(
            reg.register_factories(ConnId(1), ":1.1", &["/f/b".into()]),
            Err(BusError::AlreadyRegistered(_))
        ));
        assert!(matches!(
            reg.register_factories(ConnId(2), ":1.2", &["/f/a".into()]),
            Err(BusError::AlreadyRegistered(_))
        ));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn factories_without_info_are_not_eligible() {
        let mut reg = FactoryRegistry::new();
        reg.register_factories(ConnId(1), ":1.1", &["/f/a".into()])
            .unwrap();
        assert_eq!(reg.get_default_factory(), None);
        reg.set_info(ConnId(1), "/f/a", FactoryInfo::new("A", "de"));
        assert_eq!(reg.get_default_factory().as_deref(), Some("/f/a"));
    }

    #[test]
    fn info_from_wrong_connection_is_ignored() {
        let mut reg = FactoryRegistry::new();
        reg.register_factories(ConnId(1), ":1.1", &["/f/a".into()])
            .unwrap();
        assert!(!reg.set_info(ConnId(2), "/f/a", FactoryInfo::new("A", "de")));
        assert!(reg.get("/f/a").unwrap().info.is_none());
    }

    #[test]
    fn registration_invalidates_cache() {
        let mut reg = FactoryRegistry::new();
        register(&mut reg, 1, "/f/anthy", "Anthy", "ja");
        assert_eq!(reg.get_default_factory().as_deref(), Some("/f/anthy"));
        register(&mut reg, 2, "/f/xkb", "Xkb", "en");
        assert_eq!(reg.cached_default(), None);
        assert_eq!(reg.get_default_factory().as_deref(), Some("/f/xkb"));
    }

    #[test]
    fn removing_default_recomputes() {
        let mut reg = FactoryRegistry::new();
        register(&mut reg, 1, "/f/anthy", "Anthy", "ja");
        register(&mut reg, 2, "/f/xkb", "Xkb", "en");
        assert_eq!(reg.get_default_factory().as_deref(), Some("/f/xkb"));

        // Removing a non-default keeps the cache.
        register(&mut reg, 3, "/f/pinyin", "Pinyin", "zh");
        reg.get_default_factory();
        assert_eq!(reg.remove_connection(ConnId(3)), vec!["/f/pinyin".to_string()]);
        assert_eq!(reg.cached_default(), Some("/f/xkb"));

        reg.remove_connection(ConnId(2));
        assert_eq!(reg.cached_default(), None);
        assert_eq!(reg.get_default_factory().as_deref(), Some("/f/anthy"));
    }

    #[test]
    fn preferred_factory_wins_until_removed() {
        let mut reg = FactoryRegistry::new();
        register(&mut reg, 1, "/f/anthy", "Anthy", "ja");
        register(&mut reg, 2, "/f/xkb", "Xkb", "en");
        reg.set_preferred("/f/anthy").unwrap();
        assert_eq!(reg.get_default_factory().as_deref(), Some("/f/anthy"));
        assert!(matches!(
            reg.set_preferred("/f/missing"),
            Err(BusError::NoSuchFactory(_))
        ));
        reg.remove_connection(ConnId(1));
        assert_eq!(reg.get_default_factory().as_deref(), Some("/f/xkb"));
    }

    #[test]
    fn create_engine_targets_factory_owner() {
        let mut reg = FactoryRegistry::new();
        register(&mut reg, 4, "/f/anthy", "Anthy", "ja");
        let mut out = Outbox::new();
        let (conn, serial) = reg.create_engine(&mut out, "/f/anthy").unwrap();
        assert_eq!(conn, ConnId(4));
        let (to, msg) = out.drain().remove(0);
        assert_eq!(to, ConnId(4));
        assert_eq!(msg.serial, serial);
        assert!(matches!(
            reg.create_engine(&mut out, "/f/none"),
            Err(BusError::NoSuchFactory(_))
        ));
    }
}
