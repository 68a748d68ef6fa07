//! Meridian DNS engine
//!
//! The core of RFC 1035 and RFC 3596: a bit-exact wire codec with name
//! compression, an authoritative server answering from in-memory zones, and
//! a recursive resolver that walks the hierarchy from the root servers,
//! caches responses, and follows CNAME chains and referrals.

pub mod dns;
