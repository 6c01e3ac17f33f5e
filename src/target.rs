use std::collections::HashMap;
use std::net::IpAddr;

use crate::icmp::Family;

/// A monitored host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub addr: IpAddr,
    pub tags: Vec<String>,
}

impl Target {
    pub fn new(name: impl Into<String>, addr: IpAddr, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            addr,
            tags,
        }
    }

    pub fn family(&self) -> Family {
        Family::of(&self.addr)
    }
}

/// Immutable snapshot of the targets, keyed by address.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    targets: Vec<Target>,
    by_addr: HashMap<IpAddr, usize>,
}

impl TargetSet {
    /// Builds the set; a repeated address keeps its first definition.
    pub fn new(targets: impl IntoIterator<Item = Target>) -> Self {
        let mut set = Self::default();
        for target in targets {
            if set.by_addr.contains_key(&target.addr) {
                log::warn!(
                    "Ignoring duplicate target {} ({}), already defined",
                    target.name,
                    target.addr
                );
                continue;
            }
            set.by_addr.insert(target.addr, set.targets.len());
            set.targets.push(target);
        }
        set
    }

    pub fn get(&self, addr: &IpAddr) -> Option<&Target> {
        self.by_addr.get(addr).map(|&i| &self.targets[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn has_family(&self, family: Family) -> bool {
        self.targets.iter().any(|t| t.family() == family)
    }
}
