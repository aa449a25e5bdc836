//! The user registry: who may use a procedure gateway, whether their
//! session-key includes the client host, and which connection group they map
//! to.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::UserEntry;

#[derive(Debug, Clone, Copy)]
pub struct UserInfo {
    pub is_special: bool,
    pub grp_id: i32,
}

/// Upper-cased user name → user info, swapped wholesale on config change.
#[derive(Debug, Default)]
pub struct UserRegistry {
    inner: RwLock<HashMap<String, UserInfo>>,
    /// The entries as last configured, echoed at `/debug/conf/users`.
    raw: RwLock<Vec<UserEntry>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, entries: &[UserEntry]) {
        let mut map = HashMap::with_capacity(entries.len());
        for e in entries {
            map.insert(
                e.name.to_uppercase(),
                UserInfo {
                    is_special: e.is_special,
                    grp_id: e.grp_id,
                },
            );
        }
        *self.inner.write().expect("user registry poisoned") = map;
        *self.raw.write().expect("user registry poisoned") = entries.to_vec();
    }

    pub fn get(&self, name: &str) -> Option<UserInfo> {
        if name.is_empty() {
            return None;
        }
        self.inner
            .read()
            .expect("user registry poisoned")
            .get(&name.to_uppercase())
            .copied()
    }

    pub fn as_json(&self) -> serde_json::Value {
        let raw = self.raw.read().expect("user registry poisoned");
        serde_json::to_value(&*raw).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, special: bool, grp: i32) -> UserEntry {
        UserEntry {
            name: name.to_string(),
            is_special: special,
            grp_id: grp,
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = UserRegistry::new();
        reg.update(&[entry("Alice", true, 7)]);
        let info = reg.get("ALICE").unwrap();
        assert!(info.is_special);
        assert_eq!(info.grp_id, 7);
        assert!(reg.get("bob").is_none());
        assert!(reg.get("").is_none());
    }

    #[test]
    fn update_replaces_the_whole_map() {
        let reg = UserRegistry::new();
        reg.update(&[entry("a", false, 1)]);
        reg.update(&[entry("b", false, 2)]);
        assert!(reg.get("a").is_none());
        assert!(reg.get("b").is_some());
    }

    #[test]
    fn json_echo_preserves_entries() {
        let reg = UserRegistry::new();
        reg.update(&[entry("a", true, 3)]);
        let v = reg.as_json();
        assert_eq!(v[0]["Name"], "a");
        assert_eq!(v[0]["IsSpecial"], true);
        assert_eq!(v[0]["GRP_ID"], 3);
    }
}
