//! Inventory resources.
//!
//! Resources are plain owned values; [`Clone`] is a full structural copy, so a clone never
//! shares state with its source.

use crate::ResourceKind;

/// A geographical region, optionally nested in a parent region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct Region {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    /// Parent region, if any.
    pub parent_region: Option<Box<Region>>,
}

/// A physical site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct Site {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    /// Region the site belongs to.
    pub region: Option<Region>,
}

/// An organizational unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct Ou {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
}

/// An infrastructure provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct Provider {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    /// Provider API endpoint.
    pub api_endpoint: String,
}

/// A managed edge host together with its hardware sub-resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct Host {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    /// Hardware (SMBIOS) UUID.
    pub uuid: String,
    pub serial_number: String,
    /// Site the host is deployed at.
    pub site: Option<Site>,
    pub host_nics: Vec<HostNic>,
    pub host_gpus: Vec<HostGpu>,
    pub host_usbs: Vec<HostUsb>,
    pub host_storages: Vec<HostStorage>,
    /// Instance running on the host.
    pub instance: Option<Box<Instance>>,
}

impl Host {
    /// IDs of all embedded sub-resources (instance, NICs, GPUs, USBs, storages).
    ///
    /// Empty IDs are skipped.
    pub fn sub_resource_ids(&self) -> impl Iterator<Item = &str> {
        self.instance
            .iter()
            .map(|i| i.resource_id.as_str())
            .chain(self.host_nics.iter().map(|r| r.resource_id.as_str()))
            .chain(self.host_gpus.iter().map(|r| r.resource_id.as_str()))
            .chain(self.host_usbs.iter().map(|r| r.resource_id.as_str()))
            .chain(self.host_storages.iter().map(|r| r.resource_id.as_str()))
            .filter(|id| !id.is_empty())
    }
}

/// Network interface of a host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct HostNic {
    pub resource_id: String,
    pub tenant_id: String,
    /// Device name, e.g. `eth0`.
    pub name: String,
    pub mac_addr: String,
    /// Owning host.
    pub host: Option<Box<Host>>,
}

/// GPU of a host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct HostGpu {
    pub resource_id: String,
    pub tenant_id: String,
    /// Device name.
    pub name: String,
    pub pci_id: String,
    /// Owning host.
    pub host: Option<Box<Host>>,
}

/// USB device attached to a host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct HostUsb {
    pub resource_id: String,
    pub tenant_id: String,
    /// Device name.
    pub name: String,
    pub serial: String,
    /// Owning host.
    pub host: Option<Box<Host>>,
}

/// Storage device of a host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct HostStorage {
    pub resource_id: String,
    pub tenant_id: String,
    /// Device name.
    pub name: String,
    pub capacity_bytes: u64,
    /// Owning host.
    pub host: Option<Box<Host>>,
}

/// An OS instance deployed on a host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct Instance {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    /// Host the instance runs on.
    pub host: Option<Box<Host>>,
    /// Installed OS.
    pub os: Option<Os>,
}

/// An operating system image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct Os {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    /// Image digest.
    pub sha256: String,
}

/// A group of instances forming a workload (e.g. a cluster).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct Workload {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    pub members: Vec<WorkloadMember>,
}

/// Membership of an instance in a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct WorkloadMember {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    pub instance: Option<Box<Instance>>,
}

/// A one-off maintenance schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct SingleSchedule {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    /// Start, in seconds since the UNIX epoch.
    pub start_seconds: u64,
    /// End, in seconds since the UNIX epoch. Open-ended if absent.
    pub end_seconds: Option<u64>,
    pub target_host: Option<Box<Host>>,
    pub target_site: Option<Site>,
}

/// A recurring maintenance schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct RepeatedSchedule {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    pub duration_seconds: u32,
    /// Cron-style minute, hour, day-of-month, month and day-of-week fields.
    pub cron: String,
    pub target_host: Option<Box<Host>>,
    pub target_site: Option<Site>,
}

/// A named group of telemetry metrics or log sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct TelemetryGroup {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    pub groups: Vec<String>,
}

/// Binds a telemetry group to a region, site or instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct TelemetryProfile {
    pub resource_id: String,
    pub tenant_id: String,
    pub name: String,
    pub group: Option<TelemetryGroup>,
    pub target_instance: Option<Box<Instance>>,
    pub target_site: Option<Site>,
    pub target_region: Option<Region>,
}

/// A local login account provisioned onto instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct LocalAccount {
    pub resource_id: String,
    pub tenant_id: String,
    /// User name.
    pub name: String,
    pub ssh_key: String,
}

macro_rules! resources {
    ($($variant:ident),* $(,)?) => {
        /// Any inventory resource, tagged by kind.
        #[derive(Debug, Clone, PartialEq, Eq)]
        #[expect(missing_docs)]
        pub enum Resource {
            $($variant($variant),)*
        }

        impl Resource {
            /// Kind of this resource.
            pub fn kind(&self) -> ResourceKind {
                match self {
                    $(Self::$variant(_) => ResourceKind::$variant,)*
                }
            }

            /// Globally unique resource ID.
            pub fn resource_id(&self) -> &str {
                match self {
                    $(Self::$variant(r) => &r.resource_id,)*
                }
            }

            /// Tenant the resource belongs to.
            pub fn tenant_id(&self) -> &str {
                match self {
                    $(Self::$variant(r) => &r.tenant_id,)*
                }
            }

            /// Human readable name.
            pub fn name(&self) -> &str {
                match self {
                    $(Self::$variant(r) => &r.name,)*
                }
            }

            /// Overwrite the resource ID.
            pub fn set_resource_id(&mut self, resource_id: impl Into<String>) {
                let resource_id = resource_id.into();
                match self {
                    $(Self::$variant(r) => r.resource_id = resource_id,)*
                }
            }

            /// Overwrite the tenant ID.
            pub fn set_tenant_id(&mut self, tenant_id: impl Into<String>) {
                let tenant_id = tenant_id.into();
                match self {
                    $(Self::$variant(r) => r.tenant_id = tenant_id,)*
                }
            }
        }

        $(
            impl From<$variant> for Resource {
                fn from(r: $variant) -> Self {
                    Self::$variant(r)
                }
            }
        )*
    };
}

resources!(
    Region,
    Site,
    Ou,
    Provider,
    Host,
    HostStorage,
    HostNic,
    HostUsb,
    HostGpu,
    Instance,
    Os,
    Workload,
    WorkloadMember,
    SingleSchedule,
    RepeatedSchedule,
    TelemetryGroup,
    TelemetryProfile,
    LocalAccount,
);

impl Resource {
    /// Host embedded in a host sub-resource (instance, NIC, GPU, USB, storage).
    ///
    /// Returns `None` for every other kind, including [`Host`] itself.
    pub fn host(&self) -> Option<&Host> {
        match self {
            Self::Instance(r) => r.host.as_deref(),
            Self::HostNic(r) => r.host.as_deref(),
            Self::HostGpu(r) => r.host.as_deref(),
            Self::HostUsb(r) => r.host.as_deref(),
            Self::HostStorage(r) => r.host.as_deref(),
            _ => None,
        }
    }

    /// Returns the [`Host`] if this is one.
    pub fn as_host(&self) -> Option<&Host> {
        match self {
            Self::Host(h) => Some(h),
            _ => None,
        }
    }

    /// String value of a filterable field.
    ///
    /// Supports `resource_id`, `tenant_id`, `name`, and `uuid` for hosts.
    pub fn field(&self, field: &str) -> Option<&str> {
        match field {
            "resource_id" | "resourceId" => Some(self.resource_id()),
            "tenant_id" | "tenantId" => Some(self.tenant_id()),
            "name" => Some(self.name()),
            "uuid" => self.as_host().map(|h| h.uuid.as_str()),
            _ => None,
        }
    }
}
