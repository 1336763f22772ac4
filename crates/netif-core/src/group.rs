//! Interface groups.
//!
//! A group is a named set of interfaces ("all", "lo", user-defined
//! sets). Groups come into being when their first member joins and are
//! destroyed when the last member leaves. Names ending in a digit are
//! reserved: they would collide with interface names.

use crate::error::{NetifError, Result};
use crate::iface::Interface;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// A named interface group.
pub struct Group {
    name: String,
    /// Member count. The group exists while this is non-zero.
    refcount: AtomicU32,
    members: Mutex<Vec<Weak<Interface>>>,
}

impl Group {
    fn new(name: &str) -> Arc<Group> {
        Arc::new(Group {
            name: name.to_string(),
            refcount: AtomicU32::new(0),
            members: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of member interfaces.
    pub fn member_count(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Live members. Interfaces torn down since the last scan are
    /// skipped.
    pub fn members(&self) -> Vec<Arc<Interface>> {
        self.members
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn add_member(&self, iface: &Arc<Interface>) {
        self.members.lock().push(Arc::downgrade(iface));
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops a member; true when the group is now empty.
    fn remove_member(&self, iface: &Arc<Interface>) -> bool {
        self.members
            .lock()
            .retain(|w| w.upgrade().is_some_and(|m| !Arc::ptr_eq(&m, iface)));
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("members", &self.member_count())
            .finish()
    }
}

/// Group names may not end in a digit: "eth1" must always name an
/// interface, never a group.
pub(crate) fn validate_group_name(name: &str) -> Result<()> {
    if name.is_empty() || name.ends_with(|c: char| c.is_ascii_digit()) {
        return Err(NetifError::ReservedGroupName(name.to_string()));
    }
    Ok(())
}

/// All groups of one stack. Lives inside the stack's interface-list
/// lock; membership changes on an interface additionally hold that
/// interface's own lock.
pub(crate) struct GroupRegistry {
    groups: Vec<Arc<Group>>,
}

/// What a membership change did, so the caller can fire events after
/// releasing the list lock.
pub(crate) enum GroupChange {
    Created(Arc<Group>),
    Joined(Arc<Group>),
    Left(Arc<Group>),
    Destroyed(Arc<Group>),
}

impl GroupRegistry {
    pub(crate) fn new() -> GroupRegistry {
        GroupRegistry { groups: Vec::new() }
    }

    pub(crate) fn find(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.iter().find(|g| g.name == name).cloned()
    }

    pub(crate) fn all(&self) -> Vec<Arc<Group>> {
        self.groups.clone()
    }

    /// Adds `iface` to the named group, creating it on first join.
    pub(crate) fn join(
        &mut self,
        name: &str,
        iface: &Arc<Interface>,
    ) -> Result<GroupChange> {
        validate_group_name(name)?;
        let mut iface_inner = iface.inner().write();
        if iface_inner.groups.iter().any(|g| g.name == name) {
            return Err(NetifError::AlreadyMember(name.to_string()));
        }
        let (group, created) = match self.find(name) {
            Some(g) => (g, false),
            None => {
                let g = Group::new(name);
                self.groups.push(g.clone());
                (g, true)
            }
        };
        group.add_member(iface);
        iface_inner.groups.push(group.clone());
        Ok(if created {
            GroupChange::Created(group)
        } else {
            GroupChange::Joined(group)
        })
    }

    /// Removes `iface` from the named group, destroying it when the
    /// last member leaves.
    pub(crate) fn leave(
        &mut self,
        name: &str,
        iface: &Arc<Interface>,
    ) -> Result<GroupChange> {
        let mut iface_inner = iface.inner().write();
        let pos = iface_inner
            .groups
            .iter()
            .position(|g| g.name == name)
            .ok_or_else(|| NetifError::NotAMember(name.to_string()))?;
        let group = iface_inner.groups.remove(pos);
        if group.remove_member(iface) {
            self.groups.retain(|g| !Arc::ptr_eq(g, &group));
            Ok(GroupChange::Destroyed(group))
        } else {
            Ok(GroupChange::Left(group))
        }
    }

    /// Removes `iface` from every group it is in. Detach path.
    pub(crate) fn leave_all(&mut self, iface: &Arc<Interface>) -> Vec<GroupChange> {
        let mut changes = Vec::new();
        loop {
            // Re-scan from the head each round; leave() edits the list.
            let name = match iface.inner().read().groups.first() {
                Some(g) => g.name.clone(),
                None => break,
            };
            match self.leave(&name, iface) {
                Ok(change) => changes.push(change),
                Err(_) => break,
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::tests::test_driver;
    use crate::iface::IfFlags;
    use pretty_assertions::assert_eq;

    fn iface(name: &str) -> Arc<Interface> {
        let driver = test_driver("grp", 0);
        let ops = driver.bless(None);
        Interface::new(
            driver,
            ops,
            name.parse().unwrap(),
            None,
            IfFlags::empty(),
            1500,
            0,
        )
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_group_name("uplinks").is_ok());
        assert!(validate_group_name("pppoe").is_ok());
        assert!(matches!(
            validate_group_name("eth1"),
            Err(NetifError::ReservedGroupName(_))
        ));
        assert!(matches!(
            validate_group_name(""),
            Err(NetifError::ReservedGroupName(_))
        ));
    }

    #[test]
    fn test_join_creates_and_leave_destroys() {
        let mut reg = GroupRegistry::new();
        let a = iface("grp0");
        let b = iface("grp1");

        assert!(matches!(reg.join("uplinks", &a), Ok(GroupChange::Created(_))));
        assert!(matches!(reg.join("uplinks", &b), Ok(GroupChange::Joined(_))));
        let group = reg.find("uplinks").unwrap();
        assert_eq!(group.member_count(), 2);
        assert_eq!(a.groups(), vec!["uplinks".to_string()]);

        assert!(matches!(reg.leave("uplinks", &a), Ok(GroupChange::Left(_))));
        assert_eq!(group.member_count(), 1);
        assert!(matches!(
            reg.leave("uplinks", &b),
            Ok(GroupChange::Destroyed(_))
        ));
        assert!(reg.find("uplinks").is_none());
        // The held handle still reads, with no members.
        assert_eq!(group.member_count(), 0);
        assert!(group.members().is_empty());
    }

    #[test]
    fn test_double_join_rejected() {
        let mut reg = GroupRegistry::new();
        let a = iface("grp0");
        reg.join("uplinks", &a).unwrap();
        assert!(matches!(
            reg.join("uplinks", &a),
            Err(NetifError::AlreadyMember(_))
        ));
        // Unchanged by the failed join.
        assert_eq!(reg.find("uplinks").unwrap().member_count(), 1);
    }

    #[test]
    fn test_leave_not_a_member() {
        let mut reg = GroupRegistry::new();
        let a = iface("grp0");
        assert!(matches!(
            reg.leave("uplinks", &a),
            Err(NetifError::NotAMember(_))
        ));
    }

    #[test]
    fn test_leave_all() {
        let mut reg = GroupRegistry::new();
        let a = iface("grp0");
        let b = iface("grp1");
        reg.join("all", &a).unwrap();
        reg.join("uplinks", &a).unwrap();
        reg.join("uplinks", &b).unwrap();

        let changes = reg.leave_all(&a);
        assert_eq!(changes.len(), 2);
        assert!(a.groups().is_empty());
        assert!(reg.find("all").is_none());
        assert_eq!(reg.find("uplinks").unwrap().member_count(), 1);
    }

    #[test]
    fn test_members_skips_dead_interfaces() {
        let mut reg = GroupRegistry::new();
        let a = iface("grp0");
        reg.join("uplinks", &a).unwrap();
        let group = reg.find("uplinks").unwrap();
        drop(a);
        assert!(group.members().is_empty());
        // Count is only adjusted by explicit leave.
        assert_eq!(group.member_count(), 1);
    }
}
