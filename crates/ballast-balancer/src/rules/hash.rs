//! Key-affinity selection.

use std::sync::{Arc, Weak};

use rand::Rng;
use sha1::{Digest, Sha1};

use ballast_core::Server;

use super::{Rule, RuleBase, eligible_servers};
use crate::balancer::LoadBalancer;

/// Routes a fixed key to a fixed server for as long as the eligible set
/// does not change. Keyless calls fall back to a uniform random pick.
pub struct HashRule {
    base: RuleBase,
}

impl HashRule {
    pub fn new() -> Self {
        Self {
            base: RuleBase::new(),
        }
    }
}

impl Default for HashRule {
    fn default() -> Self {
        Self::new()
    }
}

fn key_index(key: &str, len: usize) -> usize {
    let digest = Sha1::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % len as u64) as usize
}

impl Rule for HashRule {
    fn choose(&self, key: Option<&str>) -> Option<Arc<Server>> {
        let lb = self.base.load_balancer()?;
        let servers = eligible_servers(&*lb);
        if servers.is_empty() {
            return None;
        }
        let index = match key {
            Some(key) => key_index(key, servers.len()),
            None => rand::thread_rng().gen_range(0..servers.len()),
        };
        Some(servers[index].clone())
    }

    fn set_load_balancer(&self, lb: Weak<dyn LoadBalancer>) {
        self.base.set_load_balancer(lb);
    }
}
