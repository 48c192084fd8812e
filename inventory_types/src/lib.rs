//! Shared data types for the edge inventory.
//!
//! Every inventory resource is identified by a resource ID of the form `<prefix>-<8 hex digits>`
//! where the prefix encodes the [`ResourceKind`], and is scoped to a tenant.
#![warn(missing_docs)]

pub mod filter;
pub mod messages;
pub mod resource;

pub use filter::ResourceFilter;
pub use messages::*;
pub use resource::*;

use thiserror::Error;

/// Number of hex digits following the kind prefix in a resource ID.
pub const RESOURCE_ID_SUFFIX_LEN: usize = 8;

/// Errors when deriving a [`ResourceKind`] from a resource ID.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceIdError {
    /// The ID does not have the `<prefix>-<8 hex digits>` shape.
    #[error("malformed resource id: {id:?}")]
    Malformed {
        /// The offending ID.
        id: String,
    },

    /// The ID is well-formed but its prefix names no known resource kind.
    #[error("unknown resource kind prefix {prefix:?} in resource id {id:?}")]
    UnknownPrefix {
        /// The offending ID.
        id: String,
        /// The unrecognised prefix.
        prefix: String,
    },
}

/// Discriminant of [`Resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// [`Region`]
    Region,
    /// [`Site`]
    Site,
    /// [`Ou`]
    Ou,
    /// [`Provider`]
    Provider,
    /// [`Host`]
    Host,
    /// [`HostStorage`]
    HostStorage,
    /// [`HostNic`]
    HostNic,
    /// [`HostUsb`]
    HostUsb,
    /// [`HostGpu`]
    HostGpu,
    /// [`Instance`]
    Instance,
    /// [`Os`]
    Os,
    /// [`Workload`]
    Workload,
    /// [`WorkloadMember`]
    WorkloadMember,
    /// [`SingleSchedule`]
    SingleSchedule,
    /// [`RepeatedSchedule`]
    RepeatedSchedule,
    /// [`TelemetryGroup`]
    TelemetryGroup,
    /// [`TelemetryProfile`]
    TelemetryProfile,
    /// [`LocalAccount`]
    LocalAccount,
}

impl ResourceKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 18] = [
        Self::Region,
        Self::Site,
        Self::Ou,
        Self::Provider,
        Self::Host,
        Self::HostStorage,
        Self::HostNic,
        Self::HostUsb,
        Self::HostGpu,
        Self::Instance,
        Self::Os,
        Self::Workload,
        Self::WorkloadMember,
        Self::SingleSchedule,
        Self::RepeatedSchedule,
        Self::TelemetryGroup,
        Self::TelemetryProfile,
        Self::LocalAccount,
    ];

    /// Resource ID prefix of this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::Site => "site",
            Self::Ou => "ou",
            Self::Provider => "provider",
            Self::Host => "host",
            Self::HostStorage => "hoststorage",
            Self::HostNic => "hostnic",
            Self::HostUsb => "hostusb",
            Self::HostGpu => "hostgpu",
            Self::Instance => "inst",
            Self::Os => "os",
            Self::Workload => "workload",
            Self::WorkloadMember => "workloadmember",
            Self::SingleSchedule => "singlesche",
            Self::RepeatedSchedule => "repeatedsche",
            Self::TelemetryGroup => "telemetrygroup",
            Self::TelemetryProfile => "telemetryprofile",
            Self::LocalAccount => "localaccount",
        }
    }

    /// Look up a kind by its resource ID prefix.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }

    /// Derive the kind from a resource ID such as `host-0a1b2c3d`.
    pub fn from_resource_id(resource_id: &str) -> Result<Self, ResourceIdError> {
        let malformed = || ResourceIdError::Malformed {
            id: resource_id.to_owned(),
        };

        let (prefix, suffix) = resource_id.rsplit_once('-').ok_or_else(malformed)?;
        if prefix.is_empty()
            || suffix.len() != RESOURCE_ID_SUFFIX_LEN
            || !suffix
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(malformed());
        }

        Self::from_prefix(prefix).ok_or_else(|| ResourceIdError::UnknownPrefix {
            id: resource_id.to_owned(),
            prefix: prefix.to_owned(),
        })
    }

    /// Format a resource ID of this kind from a numeric suffix.
    pub fn resource_id(&self, n: u32) -> String {
        format!("{}-{n:08x}", self.prefix())
    }

    /// Kinds that belong to a host aggregate and are tracked by the host reverse index.
    pub fn is_host_sub_resource(&self) -> bool {
        matches!(
            self,
            Self::Instance | Self::HostGpu | Self::HostNic | Self::HostStorage | Self::HostUsb
        )
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix())
    }
}
