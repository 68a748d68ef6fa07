//! Contains the data store for local zones
//!
//! Records are indexed per zone by owner name; a lookup is an exact match
//! on the owner. Zone selection picks the zone whose origin is the longest
//! label-wise suffix of the queried name. Wildcard expansion is not
//! performed.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::dns::protocol::{
    name_is_suffix, DnsPacket, DnsRecord, QueryClass, QueryType, ResultCode,
};
use crate::dns::records::RData;

#[derive(Debug)]
pub enum AuthorityError {
    PoisonedLock,
    NoSuchZone(String),
}

impl std::fmt::Display for AuthorityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorityError::PoisonedLock => write!(f, "Lock was poisoned"),
            AuthorityError::NoSuchZone(zone) => write!(f, "Zone not found: {}", zone),
        }
    }
}

impl std::error::Error for AuthorityError {}

type Result<T> = std::result::Result<T, AuthorityError>;

/// A contiguous portion of the DNS tree administered as a unit, rooted at
/// an origin and described by its SOA values.
#[derive(Clone, Debug, Default)]
pub struct Zone {
    pub origin: String,
    pub m_name: String,
    pub r_name: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
    records: BTreeMap<String, BTreeSet<DnsRecord>>,
}

impl Zone {
    pub fn new(origin: String, m_name: String, r_name: String) -> Zone {
        Zone {
            origin: origin.to_lowercase(),
            m_name: m_name.to_lowercase(),
            r_name: r_name.to_lowercase(),
            serial: 0,
            refresh: 0,
            retry: 0,
            expire: 0,
            minimum: 0,
            records: BTreeMap::new(),
        }
    }

    pub fn builder(origin: &str) -> ZoneBuilder {
        ZoneBuilder::new(origin)
    }

    /// Insert a record. Owners outside the zone are rejected: every stored
    /// owner equals or descends from the origin.
    pub fn add_record(&mut self, rec: &DnsRecord) -> bool {
        if !name_is_suffix(&self.origin, &rec.name) {
            log::warn!(
                "rejecting record for {} outside of zone {}",
                rec.name,
                self.origin
            );
            return false;
        }

        self.records
            .entry(rec.name.to_lowercase())
            .or_default()
            .insert(rec.clone())
    }

    pub fn delete_record(&mut self, rec: &DnsRecord) -> bool {
        let owner = rec.name.to_lowercase();
        let removed = match self.records.get_mut(&owner) {
            Some(set) => set.remove(rec),
            None => false,
        };

        if removed && self.records.get(&owner).map(BTreeSet::is_empty) == Some(true) {
            self.records.remove(&owner);
        }

        removed
    }

    pub fn records_at(&self, owner: &str) -> Option<&BTreeSet<DnsRecord>> {
        self.records.get(&owner.to_lowercase())
    }

    pub fn record_count(&self) -> usize {
        self.records.values().map(BTreeSet::len).sum()
    }

    /// The SOA materialized as a record owned by the origin.
    pub fn soa_record(&self) -> DnsRecord {
        DnsRecord::new(
            &self.origin,
            self.minimum,
            RData::Soa {
                m_name: self.m_name.clone(),
                r_name: self.r_name.clone(),
                serial: self.serial,
                refresh: self.refresh,
                retry: self.retry,
                expire: self.expire,
                minimum: self.minimum,
            },
        )
    }
}

/// Fluent construction of a zone and its records
///
/// ```
/// use meridian::dns::authority::Zone;
///
/// let zone = Zone::builder("example.com")
///     .soa("ns1.example.com", "admin.example.com", 2023120101, 3600, 1800, 604800, 3600)
///     .a("www.example.com", "192.0.2.10".parse().unwrap(), 3600)
///     .mx("example.com", 10, "mail.example.com", 3600)
///     .build();
///
/// assert_eq!("example.com", zone.origin);
/// ```
pub struct ZoneBuilder {
    zone: Zone,
}

impl ZoneBuilder {
    pub fn new(origin: &str) -> ZoneBuilder {
        ZoneBuilder {
            zone: Zone::new(origin.to_string(), String::new(), String::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn soa(
        mut self,
        m_name: &str,
        r_name: &str,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    ) -> ZoneBuilder {
        self.zone.m_name = m_name.to_lowercase();
        self.zone.r_name = r_name.to_lowercase();
        self.zone.serial = serial;
        self.zone.refresh = refresh;
        self.zone.retry = retry;
        self.zone.expire = expire;
        self.zone.minimum = minimum;
        self
    }

    pub fn record(mut self, rec: DnsRecord) -> ZoneBuilder {
        self.zone.add_record(&rec);
        self
    }

    pub fn a(self, owner: &str, addr: Ipv4Addr, ttl: u32) -> ZoneBuilder {
        self.record(DnsRecord::new(owner, ttl, RData::A { addr }))
    }

    pub fn aaaa(self, owner: &str, addr: Ipv6Addr, ttl: u32) -> ZoneBuilder {
        self.record(DnsRecord::new(owner, ttl, RData::Aaaa { addr }))
    }

    pub fn ns(self, owner: &str, host: &str, ttl: u32) -> ZoneBuilder {
        self.record(DnsRecord::new(
            owner,
            ttl,
            RData::Ns {
                host: host.to_lowercase(),
            },
        ))
    }

    pub fn cname(self, owner: &str, host: &str, ttl: u32) -> ZoneBuilder {
        self.record(DnsRecord::new(
            owner,
            ttl,
            RData::Cname {
                host: host.to_lowercase(),
            },
        ))
    }

    pub fn mx(self, owner: &str, priority: u16, host: &str, ttl: u32) -> ZoneBuilder {
        self.record(DnsRecord::new(
            owner,
            ttl,
            RData::Mx {
                priority,
                host: host.to_lowercase(),
            },
        ))
    }

    pub fn txt(self, owner: &str, strings: &[&str], ttl: u32) -> ZoneBuilder {
        self.record(DnsRecord::new(
            owner,
            ttl,
            RData::Txt {
                strings: strings.iter().map(|s| s.to_string()).collect(),
            },
        ))
    }

    pub fn ptr(self, owner: &str, host: &str, ttl: u32) -> ZoneBuilder {
        self.record(DnsRecord::new(
            owner,
            ttl,
            RData::Ptr {
                host: host.to_lowercase(),
            },
        ))
    }

    pub fn build(self) -> Zone {
        self.zone
    }
}

/// The set of zones this server is authoritative for
#[derive(Default)]
pub struct Zones {
    zones: BTreeMap<String, Zone>,
}

impl Zones {
    pub fn new() -> Zones {
        Zones {
            zones: BTreeMap::new(),
        }
    }

    pub fn zones(&self) -> Vec<&Zone> {
        self.zones.values().collect()
    }

    /// Insert a zone, replacing any previous zone with the same origin.
    pub fn add_zone(&mut self, zone: Zone) {
        self.zones.insert(zone.origin.clone(), zone);
    }

    pub fn remove_zone(&mut self, origin: &str) -> Option<Zone> {
        self.zones.remove(&origin.to_lowercase())
    }

    pub fn get_zone(&self, origin: &str) -> Option<&Zone> {
        self.zones.get(&origin.to_lowercase())
    }

    pub fn get_zone_mut(&mut self, origin: &str) -> Option<&mut Zone> {
        self.zones.get_mut(&origin.to_lowercase())
    }

    /// The zone whose origin is the longest label-wise suffix of `qname`.
    pub fn find_zone(&self, qname: &str) -> Option<&Zone> {
        let mut best_match: Option<(usize, &Zone)> = None;
        for zone in self.zones.values() {
            if !name_is_suffix(&zone.origin, qname) {
                continue;
            }

            let depth = zone.origin.split('.').filter(|x| !x.is_empty()).count();
            match best_match {
                Some((best_depth, _)) if best_depth >= depth => {}
                _ => best_match = Some((depth, zone)),
            }
        }

        best_match.map(|(_, zone)| zone)
    }
}

/// The synchronized zone store: many concurrent readers, exclusive
/// writers. No lock is held across calls into other components.
#[derive(Default)]
pub struct Authority {
    zones: RwLock<Zones>,
}

impl Authority {
    pub fn new() -> Authority {
        Authority {
            zones: RwLock::new(Zones::new()),
        }
    }

    pub fn read(&self) -> LockResult<RwLockReadGuard<'_, Zones>> {
        self.zones.read()
    }

    pub fn write(&self) -> LockResult<RwLockWriteGuard<'_, Zones>> {
        self.zones.write()
    }

    pub fn add_zone(&self, zone: Zone) -> Result<()> {
        let mut zones = self
            .zones
            .write()
            .map_err(|_| AuthorityError::PoisonedLock)?;
        zones.add_zone(zone);

        Ok(())
    }

    pub fn remove_zone(&self, origin: &str) -> Result<()> {
        let mut zones = self
            .zones
            .write()
            .map_err(|_| AuthorityError::PoisonedLock)?;
        if zones.remove_zone(origin).is_none() {
            return Err(AuthorityError::NoSuchZone(origin.to_string()));
        }

        Ok(())
    }

    /// All records at `qname` matching the type and class exactly. An empty
    /// result is not an error. `Any` is not expanded here; the responder
    /// decides what to do with it.
    pub fn lookup(&self, qname: &str, qtype: QueryType, qclass: QueryClass) -> Vec<DnsRecord> {
        let zones = match self.zones.read() {
            Ok(x) => x,
            Err(_) => return Vec::new(),
        };

        let zone = match zones.find_zone(qname) {
            Some(x) => x,
            None => return Vec::new(),
        };

        let mut results = Vec::new();

        if qtype == QueryType::Soa && qclass == QueryClass::In && zone.origin.eq_ignore_ascii_case(qname) {
            results.push(zone.soa_record());
        }

        if let Some(records) = zone.records_at(qname) {
            results.extend(
                records
                    .iter()
                    .filter(|rec| rec.query_type() == qtype && rec.class == qclass)
                    .cloned(),
            );
        }

        results
    }

    /// All records at `qname` regardless of type, for `Any` questions.
    pub fn lookup_all(&self, qname: &str, qclass: QueryClass) -> Vec<DnsRecord> {
        let zones = match self.zones.read() {
            Ok(x) => x,
            Err(_) => return Vec::new(),
        };

        let zone = match zones.find_zone(qname) {
            Some(x) => x,
            None => return Vec::new(),
        };

        let mut results = Vec::new();
        if qclass == QueryClass::In && zone.origin.eq_ignore_ascii_case(qname) {
            results.push(zone.soa_record());
        }

        if let Some(records) = zone.records_at(qname) {
            results.extend(records.iter().filter(|rec| rec.class == qclass).cloned());
        }

        results
    }

    /// NS records delegating the deepest proper ancestor of `qname` below
    /// the covering zone's apex, together with any glue A/AAAA records the
    /// zone holds for those name server hosts. `None` when no zone covers
    /// the name or nothing is delegated.
    pub fn find_referral(&self, qname: &str) -> Option<(Vec<DnsRecord>, Vec<DnsRecord>)> {
        let zones = self.zones.read().ok()?;
        let zone = zones.find_zone(qname)?;

        find_delegation(zone, qname)
    }

    /// The SOA of the zone covering `qname`, as carried in the authority
    /// section of an NXDOMAIN response.
    pub fn soa_for(&self, qname: &str) -> Option<DnsRecord> {
        let zones = self.zones.read().ok()?;
        let zone = zones.find_zone(qname)?;

        Some(zone.soa_record())
    }

    /// Answer a question authoritatively. `None` means no zone covers the
    /// name and this server holds no authority over it at all.
    pub fn query(&self, qname: &str, qtype: QueryType, qclass: QueryClass) -> Option<DnsPacket> {
        let zones = self.zones.read().ok()?;
        let zone = zones.find_zone(qname)?;

        log::debug!("answering {} {:?} from zone {}", qname, qtype, zone.origin);

        let mut packet = DnsPacket::new();
        packet.header.authoritative_answer = true;

        let mut answers: Vec<DnsRecord> = Vec::new();
        if let Some(records) = zone.records_at(qname) {
            for rec in records {
                if rec.class != qclass {
                    continue;
                }

                let rtype = rec.query_type();
                // A CNAME stands in for the requested type at its owner.
                if qtype == QueryType::Any
                    || rtype == qtype
                    || (rtype == QueryType::Cname && qtype != QueryType::Cname)
                {
                    answers.push(rec.clone());
                }
            }
        }
        if (qtype == QueryType::Soa || qtype == QueryType::Any)
            && qclass == QueryClass::In
            && zone.origin.eq_ignore_ascii_case(qname)
        {
            answers.insert(0, zone.soa_record());
        }

        if !answers.is_empty() {
            packet.answers = answers;
            return Some(packet);
        }

        // Nothing at the name itself. A delegation at a proper ancestor,
        // strictly below the apex, turns the response into a referral.
        if let Some((ns_records, glue)) = find_delegation(zone, qname) {
            packet.authorities = ns_records;
            packet.resources = glue;
            return Some(packet);
        }

        packet.header.rescode = ResultCode::NXDOMAIN;
        packet.authorities.push(zone.soa_record());

        Some(packet)
    }
}

/// The zone-level part of `Authority::find_referral`, also used by
/// `Authority::query` while it already holds the read lock.
fn find_delegation(zone: &Zone, qname: &str) -> Option<(Vec<DnsRecord>, Vec<DnsRecord>)> {
    let origin_depth = zone.origin.split('.').filter(|x| !x.is_empty()).count();
    let labels: Vec<&str> = qname.split('.').filter(|x| !x.is_empty()).collect();

    for start in 1..labels.len() {
        if labels.len() - start <= origin_depth {
            break;
        }
        let ancestor = labels[start..].join(".");

        let ns_records: Vec<DnsRecord> = match zone.records_at(&ancestor) {
            Some(records) => records
                .iter()
                .filter(|rec| rec.query_type() == QueryType::Ns)
                .cloned()
                .collect(),
            None => continue,
        };

        if ns_records.is_empty() {
            continue;
        }

        let mut glue = Vec::new();
        for rec in &ns_records {
            if let RData::Ns { ref host } = rec.rdata {
                if let Some(host_records) = zone.records_at(host) {
                    glue.extend(
                        host_records
                            .iter()
                            .filter(|r| {
                                matches!(r.rdata, RData::A { .. } | RData::Aaaa { .. })
                            })
                            .cloned(),
                    );
                }
            }
        }

        return Some((ns_records, glue));
    }

    None
}
