//! DNS response cache
//!
//! Entries are keyed by the question triple (name, type, class) and hold
//! the full response message together with its insertion time. An entry is
//! fresh while less than the smallest answer TTL has elapsed; stale entries
//! behave like misses and are evicted on the next touch.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Local};
use derive_more::{Display, Error};
use serde_derive::{Deserialize, Serialize};

use crate::dns::protocol::{DnsPacket, QueryClass, QueryType};

#[derive(Debug, Display, Error)]
pub enum CacheError {
    PoisonedLock,
}

type Result<T> = std::result::Result<T, CacheError>;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheKey {
    pub name: String,
    pub qtype: QueryType,
    pub class: QueryClass,
}

impl CacheKey {
    pub fn new(name: &str, qtype: QueryType, class: QueryClass) -> CacheKey {
        CacheKey {
            name: name.to_lowercase(),
            qtype,
            class,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResponseEntry {
    pub packet: DnsPacket,
    pub timestamp: DateTime<Local>,
    pub hits: u32,
    pub updates: u32,
}

impl ResponseEntry {
    fn new(packet: DnsPacket) -> ResponseEntry {
        ResponseEntry {
            packet,
            timestamp: Local::now(),
            hits: 0,
            updates: 1,
        }
    }

    /// Fresh while the youngest answer has TTL left. A message without
    /// answers never counts as fresh.
    fn is_fresh(&self, now: DateTime<Local>) -> bool {
        let min_ttl = match self.packet.answers.iter().map(|r| r.get_ttl()).min() {
            Some(ttl) => ttl,
            None => return false,
        };

        self.timestamp + Duration::seconds(min_ttl as i64) > now
    }
}

/// A summary of one cache entry, for inspection and statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheSummary {
    pub name: String,
    pub qtype: QueryType,
    pub class: QueryClass,
    pub answers: usize,
    pub hits: u32,
    pub updates: u32,
}

#[derive(Default)]
pub struct Cache {
    entries: BTreeMap<CacheKey, ResponseEntry>,
}

impl Cache {
    pub fn new() -> Cache {
        Cache {
            entries: BTreeMap::new(),
        }
    }

    pub fn lookup(&mut self, qname: &str, qtype: QueryType, class: QueryClass) -> Option<DnsPacket> {
        let key = CacheKey::new(qname, qtype, class);
        let now = Local::now();

        match self.entries.get_mut(&key) {
            Some(entry) if entry.is_fresh(now) => {
                entry.hits += 1;
                Some(entry.packet.clone())
            }
            Some(_) => {
                self.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn store(&mut self, qname: &str, qtype: QueryType, class: QueryClass, packet: &DnsPacket) {
        if packet.answers.is_empty() {
            // Nothing worth keeping; negative results are not cached.
            return;
        }

        let key = CacheKey::new(qname, qtype, class);
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.packet = packet.clone();
                entry.timestamp = Local::now();
                entry.updates += 1;
            }
            None => {
                self.entries.insert(key, ResponseEntry::new(packet.clone()));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every stale entry.
    pub fn sweep(&mut self) {
        let now = Local::now();
        self.entries.retain(|_, entry| entry.is_fresh(now));
    }

    pub fn list(&self) -> Vec<CacheSummary> {
        self.entries
            .iter()
            .map(|(key, entry)| CacheSummary {
                name: key.name.clone(),
                qtype: key.qtype,
                class: key.class,
                answers: entry.packet.answers.len(),
                hits: entry.hits,
                updates: entry.updates,
            })
            .collect()
    }
}

/// The shared cache: many concurrent readers, exclusive writers. Lookups
/// take the write side because they update hit counters and evict stale
/// entries in place.
#[derive(Default)]
pub struct SynchronizedCache {
    cache: RwLock<Cache>,
}

impl SynchronizedCache {
    pub fn new() -> SynchronizedCache {
        SynchronizedCache {
            cache: RwLock::new(Cache::new()),
        }
    }

    pub fn lookup(&self, qname: &str, qtype: QueryType, class: QueryClass) -> Option<DnsPacket> {
        let mut cache = match self.cache.write() {
            Ok(x) => x,
            Err(_) => return None,
        };

        cache.lookup(qname, qtype, class)
    }

    pub fn store(
        &self,
        qname: &str,
        qtype: QueryType,
        class: QueryClass,
        packet: &DnsPacket,
    ) -> Result<()> {
        let mut cache = self.cache.write().map_err(|_| CacheError::PoisonedLock)?;
        cache.store(qname, qtype, class, packet);

        Ok(())
    }

    pub fn sweep(&self) -> Result<()> {
        let mut cache = self.cache.write().map_err(|_| CacheError::PoisonedLock)?;
        cache.sweep();

        Ok(())
    }

    pub fn list(&self) -> Result<Vec<CacheSummary>> {
        let cache = self.cache.read().map_err(|_| CacheError::PoisonedLock)?;

        Ok(cache.list())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::dns::protocol::DnsRecord;
    use crate::dns::records::RData;

    fn answer_packet(qname: &str, ttl: u32) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.answers.push(DnsRecord::new(
            qname,
            ttl,
            RData::A {
                addr: "127.0.0.1".parse().unwrap(),
            },
        ));
        packet
    }

    #[test]
    fn test_cache_miss_then_hit() {
        let mut cache = Cache::new();

        assert!(cache
            .lookup("www.google.com", QueryType::A, QueryClass::In)
            .is_none());

        let packet = answer_packet("www.google.com", 3600);
        cache.store("www.google.com", QueryType::A, QueryClass::In, &packet);

        let hit = cache
            .lookup("www.google.com", QueryType::A, QueryClass::In)
            .unwrap();
        assert_eq!(packet.answers, hit.answers);
    }

    #[test]
    fn test_cache_key_includes_type_and_class() {
        let mut cache = Cache::new();

        let packet = answer_packet("www.google.com", 3600);
        cache.store("www.google.com", QueryType::A, QueryClass::In, &packet);

        assert!(cache
            .lookup("www.google.com", QueryType::Cname, QueryClass::In)
            .is_none());
        assert!(cache
            .lookup("www.google.com", QueryType::A, QueryClass::Ch)
            .is_none());
        assert!(cache
            .lookup("www.google.com", QueryType::A, QueryClass::In)
            .is_some());
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let mut cache = Cache::new();

        let packet = answer_packet("www.yahoo.com", 0);
        cache.store("www.yahoo.com", QueryType::A, QueryClass::In, &packet);

        assert!(cache
            .lookup("www.yahoo.com", QueryType::A, QueryClass::In)
            .is_none());
        // The stale entry is evicted by the failed lookup.
        assert_eq!(0, cache.len());
    }

    #[test]
    fn test_freshness_uses_minimum_answer_ttl() {
        let mut cache = Cache::new();

        let mut packet = answer_packet("www.example.com", 3600);
        packet.answers.push(DnsRecord::new(
            "www.example.com",
            0,
            RData::A {
                addr: "127.0.0.2".parse().unwrap(),
            },
        ));
        cache.store("www.example.com", QueryType::A, QueryClass::In, &packet);

        assert!(cache
            .lookup("www.example.com", QueryType::A, QueryClass::In)
            .is_none());
    }

    #[test]
    fn test_empty_answers_are_not_cached() {
        let mut cache = Cache::new();

        cache.store("www.example.com", QueryType::A, QueryClass::In, &DnsPacket::new());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_replaces_and_counts() {
        let mut cache = Cache::new();

        let packet = answer_packet("www.google.com", 3600);
        cache.store("www.google.com", QueryType::A, QueryClass::In, &packet);
        cache.store("www.google.com", QueryType::A, QueryClass::In, &packet);
        let _ = cache.lookup("www.google.com", QueryType::A, QueryClass::In);

        let list = cache.list();
        assert_eq!(1, list.len());
        assert_eq!("www.google.com", list[0].name);
        assert_eq!(2, list[0].updates);
        assert_eq!(1, list[0].hits);
    }

    #[test]
    fn test_sweep_drops_stale_entries() {
        let mut cache = Cache::new();

        cache.store(
            "a.example.com",
            QueryType::A,
            QueryClass::In,
            &answer_packet("a.example.com", 3600),
        );
        cache.store(
            "b.example.com",
            QueryType::A,
            QueryClass::In,
            &answer_packet("b.example.com", 0),
        );

        cache.sweep();
        assert_eq!(1, cache.len());
    }

    #[test]
    fn test_synchronized_cache() {
        let cache = SynchronizedCache::new();

        let packet = answer_packet("www.google.com", 3600);
        cache
            .store("www.google.com", QueryType::A, QueryClass::In, &packet)
            .unwrap();

        assert!(cache
            .lookup("www.google.com", QueryType::A, QueryClass::In)
            .is_some());
        assert_eq!(1, cache.list().unwrap().len());
    }
}
