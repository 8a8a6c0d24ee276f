//! Name service: unique connection names and well-known name ownership.

use std::collections::HashMap;

use imbus_types::message::{NAME_FLAG_ALLOW_REPLACEMENT, NAME_FLAG_REPLACE_EXISTING};
use imbus_types::names::{is_reserved, is_unique, validate_bus_name};
use imbus_types::{BusSignal, ReleaseNameReply, RequestNameReply};
use tracing::{debug, info};

use crate::connection::{ConnId, Connection, ConnectionTable};
use crate::error::BusError;

/// A name-ownership change the broker must deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameEvent {
    /// Delivered to every connection whose match rules accept it.
    Broadcast(BusSignal),
    /// Delivered to one connection regardless of match rules.
    Direct(ConnId, BusSignal),
}

/// Who answers for a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// One of the reserved names served in-process.
    Broker,
    Connection(ConnId),
}

#[derive(Debug)]
struct NameEntry {
    owner: ConnId,
    unique: String,
    allow_replacement: bool,
}

#[derive(Debug, Default)]
pub struct NameRegistry {
    next_unique: u64,
    uniques: HashMap<String, ConnId>,
    owners: HashMap<String, NameEntry>,
}

fn owner_changed(name: &str, old_owner: &str, new_owner: &str) -> NameEvent {
    NameEvent::Broadcast(BusSignal::NameOwnerChanged {
        name: name.to_string(),
        old_owner: old_owner.to_string(),
        new_owner: new_owner.to_string(),
    })
}

/// Reject names a peer may never own.
fn check_well_known(name: &str) -> Result<(), BusError> {
    if name.is_empty() || is_unique(name) || is_reserved(name) {
        return Err(BusError::InvalidName(name.to_string()));
    }
    validate_bus_name(name).map_err(|_| BusError::InvalidName(name.to_string()))
}

impl NameRegistry {
    pub fn new() -> Self {
        Self {
            next_unique: 1,
            ..Self::default()
        }
    }

    /// Assign the connection its unique name (`:1.N`).
    pub fn register_connection(
        &mut self,
        conn: &mut Connection,
        events: &mut Vec<NameEvent>,
    ) -> Result<String, BusError> {
        if let Some(existing) = conn.unique_name() {
            return Err(BusError::NameConflict(existing.to_string()));
        }
        let unique = format!(":1.{}", self.next_unique);
        conn.assign_unique_name(unique.clone())?;
        self.next_unique += 1;
        self.uniques.insert(unique.clone(), conn.id());
        info!(conn = %conn.id(), name = %unique, "connection registered");
        events.push(owner_changed(&unique, "", &unique));
        events.push(NameEvent::Direct(
            conn.id(),
            BusSignal::NameAcquired {
                name: unique.clone(),
            },
        ));
        Ok(unique)
    }

    pub fn request_name(
        &mut self,
        conns: &mut ConnectionTable,
        id: ConnId,
        name: &str,
        flags: u32,
        events: &mut Vec<NameEvent>,
    ) -> Result<RequestNameReply, BusError> {
        check_well_known(name)?;
        let unique = conns
            .get(&id)
            .and_then(Connection::unique_name)
            .map(str::to_string)
            .ok_or_else(|| BusError::ProtocolViolation("Hello must be called first".into()))?;
        let allow_replacement = flags & NAME_FLAG_ALLOW_REPLACEMENT != 0;

        if let Some(entry) = self.owners.get_mut(name) {
            if entry.owner == id {
                entry.allow_replacement = allow_replacement;
                return Ok(RequestNameReply::AlreadyOwner);
            }
            if flags & NAME_FLAG_REPLACE_EXISTING == 0 || !entry.allow_replacement {
                return Ok(RequestNameReply::InUse);
            }
            let previous = std::mem::replace(
                entry,
                NameEntry {
                    owner: id,
                    unique: unique.clone(),
                    allow_replacement,
                },
            );
            if let Some(old) = conns.get_mut(&previous.owner) {
                old.remove_name(name);
            }
            if let Some(new) = conns.get_mut(&id) {
                new.add_name(name);
            }
            info!(name, from = %previous.unique, to = %unique, "name replaced");
            events.push(NameEvent::Direct(
                previous.owner,
                BusSignal::NameLost {
                    name: name.to_string(),
                },
            ));
            events.push(owner_changed(name, &previous.unique, &unique));
            events.push(NameEvent::Direct(
                id,
                BusSignal::NameAcquired {
                    name: name.to_string(),
                },
            ));
            return Ok(RequestNameReply::PrimaryOwner);
        }

        self.owners.insert(
            name.to_string(),
            NameEntry {
                owner: id,
                unique: unique.clone(),
                allow_replacement,
            },
        );
        if let Some(conn) = conns.get_mut(&id) {
            conn.add_name(name);
        }
        debug!(name, owner = %unique, "name acquired");
        events.push(owner_changed(name, "", &unique));
        events.push(NameEvent::Direct(
            id,
            BusSignal::NameAcquired {
                name: name.to_string(),
            },
        ));
        Ok(RequestNameReply::PrimaryOwner)
    }

    pub fn release_name(
        &mut self,
        conns: &mut ConnectionTable,
        id: ConnId,
        name: &str,
        events: &mut Vec<NameEvent>,
    ) -> Result<ReleaseNameReply, BusError> {
        check_well_known(name)?;
        let Some(entry) = self.owners.get(name) else {
            return Ok(ReleaseNameReply::NonExistent);
        };
        if entry.owner != id {
            return Ok(ReleaseNameReply::NotOwner);
        }
        let Some(entry) = self.owners.remove(name) else {
            return Ok(ReleaseNameReply::NonExistent);
        };
        if let Some(conn) = conns.get_mut(&id) {
            conn.remove_name(name);
        }
        debug!(name, owner = %entry.unique, "name released");
        events.push(owner_changed(name, &entry.unique, ""));
        events.push(NameEvent::Direct(
            id,
            BusSignal::NameLost {
                name: name.to_string(),
            },
        ));
        Ok(ReleaseNameReply::Released)
    }

    /// Release every name a departing connection held, unique name last.
    pub fn remove_connection(&mut self, conn: &mut Connection, events: &mut Vec<NameEvent>) {
        let Some(unique) = conn.unique_name().map(str::to_string) else {
            return;
        };
        for name in conn.take_names() {
            self.owners.remove(&name);
            events.push(owner_changed(&name, &unique, ""));
        }
        self.uniques.remove(&unique);
        events.push(owner_changed(&unique, &unique, ""));
        debug!(conn = %conn.id(), name = %unique, "names released on disconnect");
    }

    pub fn lookup_owner(&self, name: &str) -> Result<Owner, BusError> {
        if is_reserved(name) {
            return Ok(Owner::Broker);
        }
        let owner = if is_unique(name) {
            self.uniques.get(name).copied()
        } else {
            self.owners.get(name).map(|e| e.owner)
        };
        owner
            .map(Owner::Connection)
            .ok_or_else(|| BusError::NoSuchName(name.to_string()))
    }

    /// Unique name of the owner, or the name itself for reserved names.
    pub fn owner_name(&self, name: &str) -> Result<String, BusError> {
        if is_reserved(name) {
            return Ok(name.to_string());
        }
        if is_unique(name) {
            return self
                .uniques
                .contains_key(name)
                .then(|| name.to_string())
                .ok_or_else(|| BusError::NoSuchName(name.to_string()));
        }
        self.owners
            .get(name)
            .map(|e| e.unique.clone())
            .ok_or_else(|| BusError::NoSuchName(name.to_string()))
    }

    pub fn has_owner(&self, name: &str) -> bool {
        self.lookup_owner(name).is_ok()
    }

    /// Every name with an owner, reserved names included, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = [imbus_types::BUS_NAME, imbus_types::BROKER_NAME]
            .iter()
            .map(|n| (*n).to_string())
            .chain(self.owners.keys().cloned())
            .chain(self.uniques.keys().cloned())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn table(n: u64) -> ConnectionTable {
        (1..=n)
            .map(|i| {
                let (tx, _rx) = mpsc::channel(8);
                (ConnId(i), Connection::new(ConnId(i), tx))
            })
            .collect()
    }

    fn hello_all(reg: &mut NameRegistry, conns: &mut ConnectionTable) {
        let mut ids: Vec<ConnId> = conns.keys().copied().collect();
        ids.sort();
        for id in ids {
            let conn = conns.get_mut(&id).unwrap();
            reg.register_connection(conn, &mut Vec::new()).unwrap();
        }
    }

    #[test]
    fn unique_names_count_from_one() {
        let mut reg = NameRegistry::new();
        let mut conns = table(2);
        let mut events = Vec::new();
        let first = reg
            .register_connection(conns.get_mut(&ConnId(1)).unwrap(), &mut events)
            .unwrap();
        let second = reg
            .register_connection(conns.get_mut(&ConnId(2)).unwrap(), &mut events)
            .unwrap();
        assert_eq!(first, ":1.1");
        assert_eq!(second, ":1.2");
        assert!(events.contains(&NameEvent::Direct(
            ConnId(1),
            BusSignal::NameAcquired { name: ":1.1".into() }
        )));
    }

    #[test]
    fn second_hello_conflicts() {
        let mut reg = NameRegistry::new();
        let mut conns = table(1);
        let conn = conns.get_mut(&ConnId(1)).unwrap();
        reg.register_connection(conn, &mut Vec::new()).unwrap();
        assert!(matches!(
            reg.register_connection(conn, &mut Vec::new()),
            Err(BusError::NameConflict(_))
        ));
    }

    #[test]
    fn name_has_single_owner() {
        let mut reg = NameRegistry::new();
        let mut conns = table(2);
        hello_all(&mut reg, &mut conns);
        let mut events = Vec::new();
        let name = "org.example.Panel";

        let a = reg.request_name(&mut conns, ConnId(1), name, 0, &mut events);
        let b = reg.request_name(&mut conns, ConnId(2), name, 0, &mut events);
        let again = reg.request_name(&mut conns, ConnId(1), name, 0, &mut events);
        assert_eq!(a, Ok(RequestNameReply::PrimaryOwner));
        assert_eq!(b, Ok(RequestNameReply::InUse));
        assert_eq!(again, Ok(RequestNameReply::AlreadyOwner));
        assert_eq!(reg.lookup_owner(name), Ok(Owner::Connection(ConnId(1))));
        assert_eq!(reg.owner_name(name).unwrap(), ":1.1");
    }

    #[test]
    fn released_name_can_be_requested_again() {
        let mut reg = NameRegistry::new();
        let mut conns = table(2);
        hello_all(&mut reg, &mut conns);
        let mut events = Vec::new();
        let name = "org.example.Engine";

        reg.request_name(&mut conns, ConnId(1), name, 0, &mut events)
            .unwrap();
        assert_eq!(
            reg.release_name(&mut conns, ConnId(2), name, &mut events),
            Ok(ReleaseNameReply::NotOwner)
        );
        assert_eq!(
            reg.release_name(&mut conns, ConnId(1), name, &mut events),
            Ok(ReleaseNameReply::Released)
        );
        assert_eq!(
            reg.release_name(&mut conns, ConnId(1), name, &mut events),
            Ok(ReleaseNameReply::NonExistent)
        );
        assert_eq!(
            reg.request_name(&mut conns, ConnId(2), name, 0, &mut events),
            Ok(RequestNameReply::PrimaryOwner)
        );
        assert_eq!(conns[&ConnId(2)].names().collect::<Vec<_>>(), vec![name]);
        assert_eq!(conns[&ConnId(1)].names().count(), 0);
    }

    #[test]
    fn replacement_needs_both_flags() {
        let mut reg = NameRegistry::new();
        let mut conns = table(2);
        hello_all(&mut reg, &mut conns);
        let name = "org.example.Config";
        let mut events = Vec::new();

        reg.request_name(&mut conns, ConnId(1), name, 0, &mut events)
            .unwrap();
        assert_eq!(
            reg.request_name(
                &mut conns,
                ConnId(2),
                name,
                NAME_FLAG_REPLACE_EXISTING,
                &mut events
            ),
            Ok(RequestNameReply::InUse)
        );

        // Owner now allows replacement.
        reg.request_name(
            &mut conns,
            ConnId(1),
            name,
            NAME_FLAG_ALLOW_REPLACEMENT,
            &mut events,
        )
        .unwrap();
        events.clear();
        assert_eq!(
            reg.request_name(
                &mut conns,
                ConnId(2),
                name,
                NAME_FLAG_REPLACE_EXISTING,
                &mut events
            ),
            Ok(RequestNameReply::PrimaryOwner)
        );
        assert_eq!(
            events,
            vec![
                NameEvent::Direct(ConnId(1), BusSignal::NameLost { name: name.into() }),
                owner_changed(name, ":1.1", ":1.2"),
                NameEvent::Direct(ConnId(2), BusSignal::NameAcquired { name: name.into() }),
            ]
        );
        assert_eq!(conns[&ConnId(1)].names().count(), 0);
    }

    #[test]
    fn invalid_names_rejected() {
        let mut reg = NameRegistry::new();
        let mut conns = table(1);
        hello_all(&mut reg, &mut conns);
        for bad in [":1.9", "org.imbus.Broker", "org.imbus.Bus", "", "nodots"] {
            assert!(matches!(
                reg.request_name(&mut conns, ConnId(1), bad, 0, &mut Vec::new()),
                Err(BusError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn reserved_names_are_owned_by_broker() {
        let reg = NameRegistry::new();
        assert_eq!(reg.lookup_owner(imbus_types::BUS_NAME), Ok(Owner::Broker));
        assert_eq!(reg.lookup_owner(imbus_types::BROKER_NAME), Ok(Owner::Broker));
        assert!(matches!(
            reg.lookup_owner("org.example.Missing"),
            Err(BusError::NoSuchName(_))
        ));
        assert!(!reg.has_owner(":1.5"));
    }

    #[test]
    fn teardown_releases_names_then_unique() {
        let mut reg = NameRegistry::new();
        let mut conns = table(1);
        hello_all(&mut reg, &mut conns);
        reg.request_name(&mut conns, ConnId(1), "org.example.A", 0, &mut Vec::new())
            .unwrap();
        reg.request_name(&mut conns, ConnId(1), "org.example.B", 0, &mut Vec::new())
            .unwrap();

        let mut events = Vec::new();
        reg.remove_connection(conns.get_mut(&ConnId(1)).unwrap(), &mut events);
        assert_eq!(
            events,
            vec![
                owner_changed("org.example.A", ":1.1", ""),
                owner_changed("org.example.B", ":1.1", ""),
                owner_changed(":1.1", ":1.1", ""),
            ]
        );
        assert!(!reg.has_owner("org.example.A"));
        assert!(!reg.has_owner(":1.1"));
        assert_eq!(
            reg.list_names(),
            vec![imbus_types::BROKER_NAME.to_string(), imbus_types::BUS_NAME.to_string()]
        );
    }
}
