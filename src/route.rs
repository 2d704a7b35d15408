//! Route identity and the seams to the route table and route-map
//! subsystems. The damping engine never parses messages or selects
//! paths; it only consumes these bindings and callbacks.

use std::convert::TryFrom;
use std::fmt;
use std::net::IpAddr;

use bgp_rs::{ASPath, Origin, AFI, SAFI};
use ipnetwork::IpNetwork;
use serde::{self, Serialize, Serializer};

use crate::params::DampParams;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Family {
    pub afi: AFI,
    pub safi: SAFI,
}

impl Family {
    pub fn new(afi: AFI, safi: SAFI) -> Self {
        Self { afi, safi }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.afi, self.safi)
    }
}

impl From<&Family> for (AFI, SAFI) {
    fn from(family: &Family) -> (AFI, SAFI) {
        (family.afi, family.safi)
    }
}

impl TryFrom<(u16, u8)> for Family {
    type Error = std::io::Error;

    fn try_from(v: (u16, u8)) -> Result<Self, Self::Error> {
        Ok(Self::new(AFI::try_from(v.0)?, SAFI::try_from(v.1)?))
    }
}

impl Serialize for Family {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Stable identity for one route instance: the table node's prefix and
/// the peer the path was learned from
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RouteId {
    pub prefix: IpNetwork,
    pub peer: IpAddr,
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} via {}", self.prefix, self.peer)
    }
}

/// Session relationship of the announcing peer. Only external and
/// confederation-external peerings are subject to damping.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PeerSort {
    External,
    ConfedExternal,
    Internal,
}

impl PeerSort {
    pub fn is_external(&self) -> bool {
        matches!(self, PeerSort::External | PeerSort::ConfedExternal)
    }
}

/// Path attributes handed to route-map evaluation when a record is
/// about to be created
#[derive(Clone, Debug)]
pub struct PathAttributes {
    pub origin: Origin,
    pub as_path: ASPath,
    pub local_pref: Option<u32>,
    pub multi_exit_disc: Option<u32>,
    pub communities: Vec<u32>,
}

impl PathAttributes {
    pub fn empty() -> Self {
        Self {
            origin: Origin::INCOMPLETE,
            as_path: ASPath { segments: vec![] },
            local_pref: None,
            multi_exit_disc: None,
            communities: vec![],
        }
    }
}

/// Callbacks into the route table / best-path selection subsystem
pub trait RouteStore {
    /// Bump aggregate state for the node; always invoked just before
    /// `reprocess` on a suppression-clearing transition
    fn aggregate_increment(&mut self, route: &RouteId, family: Family);
    /// Re-run selection and re-advertise the node
    fn reprocess(&mut self, route: &RouteId, family: Family);
}

/// Route-map evaluation, resolved once at record-creation time
pub trait RouteMapEval {
    fn evaluate(
        &self,
        name: &str,
        prefix: &IpNetwork,
        attributes: &PathAttributes,
    ) -> Option<DampParams>;
}
