//! Wire types for the Metal REST API.
//!
//! Field names follow the backend's PascalCase JSON. Response types default
//! every field so older portals that omit newer fields still decode.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
            /// A value this client does not know about.
            #[default]
            #[serde(other)]
            Unknown,
        }

        impl $name {
            /// The wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                    Self::Unknown => "unknown",
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    /// Coarse host lifecycle state.
    pub enum HostState {
        New => "new",
        Ready => "ready",
        Failed => "failed",
        Deleting => "deleting",
        Deleted => "deleted",
    }
}

wire_enum! {
    /// Host power status as reported by the portal.
    pub enum PowerState {
        On => "on",
        Off => "off",
    }
}

wire_enum! {
    /// Coarse volume lifecycle state.
    pub enum VolumeState {
        New => "new",
        Allocating => "allocating",
        Allocated => "allocated",
        Visible => "visible",
        Deleting => "deleting",
        Deleted => "deleted",
        Failed => "failed",
    }
}

wire_enum! {
    /// Volume sub-state; only the update-related values matter here.
    pub enum VolumeSubState {
        Idle => "",
        UpdateRequested => "update_requested",
        Updating => "updating",
        Updated => "updated",
        UpdateFailed => "update_failed",
    }
}

// ============================================================================
// Available resources
// ============================================================================

/// A data center, addressed by users as `country:region:data-center`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Location {
    #[serde(rename = "ID")]
    pub id: String,
    pub country: String,
    pub region: String,
    pub data_center: String,
}

/// An OS image offered by the portal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServiceImage {
    #[serde(rename = "ID")]
    pub id: String,
    pub flavor: String,
    pub version: String,
    pub category: String,
}

/// Short form of an SSH key in the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SshKeyRef {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
}

/// Free-form marketing text attached to sizes and flavors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Details {
    pub banner1: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MachineSize {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub details: Details,
}

/// Number of free machines of one size at one location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MachineInventory {
    #[serde(rename = "SizeID")]
    pub size_id: String,
    #[serde(rename = "LocationID")]
    pub location_id: String,
    pub number: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeFlavor {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub details: Details,
}

/// Short form of a volume in the snapshot. Capacity is in KiB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeInfo {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub capacity: i64,
    #[serde(rename = "LocationID")]
    pub location_id: String,
    #[serde(rename = "FlavorID")]
    pub flavor_id: String,
    #[serde(rename = "StoragePoolID")]
    pub storage_pool_id: String,
}

/// Storage pool; capacity is in GiB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StoragePool {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(rename = "LocationID")]
    pub location_id: String,
    pub capacity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeCollection {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(rename = "LocationID")]
    pub location_id: String,
    pub description: String,
}

/// Everything a project may use, as returned by `GET /available-resources`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AvailableResources {
    pub locations: Vec<Location>,
    pub images: Vec<ServiceImage>,
    #[serde(rename = "SSHKeys")]
    pub ssh_keys: Vec<SshKeyRef>,
    pub networks: Vec<Network>,
    pub machine_sizes: Vec<MachineSize>,
    pub machine_inventory: Vec<MachineInventory>,
    pub volume_flavors: Vec<VolumeFlavor>,
    pub volumes: Vec<VolumeInfo>,
    pub storage_pools: Vec<StoragePool>,
    pub volume_collections: Vec<VolumeCollection>,
}

// ============================================================================
// Hosts
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IscsiConfig {
    #[serde(rename = "CHAPUser")]
    pub chap_user: String,
    #[serde(rename = "CHAPSecret")]
    pub chap_secret: String,
    pub initiator_name: String,
}

/// Addressing of one network on a host port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConnectionNetwork {
    pub name: String,
    #[serde(rename = "IP")]
    pub ip: String,
    pub subnet: String,
    pub gateway: String,
    #[serde(rename = "VLAN")]
    pub vlan: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HostConnection {
    pub networks: Vec<ConnectionNetwork>,
}

/// A provisioned host. Sent back unchanged apart from edited fields on update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Host {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "LocationID")]
    pub location_id: String,
    pub state: HostState,
    pub substate: String,
    pub power_status: PowerState,
    pub portal_comm_okay: bool,
    pub service_flavor: String,
    pub service_version: String,
    #[serde(rename = "SSHAuthorizedKeys")]
    pub ssh_authorized_keys: Vec<String>,
    #[serde(rename = "MachineSizeID")]
    pub machine_size_id: String,
    pub machine_size_name: String,
    #[serde(rename = "NetworkIDs")]
    pub network_ids: Vec<String>,
    pub network_for_default_route: String,
    pub network_untagged: String,
    pub user_data: String,
    pub connections: Vec<HostConnection>,
    #[serde(rename = "ISCSIConfig")]
    pub iscsi_config: IscsiConfig,
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Body of `POST /hosts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewHost {
    pub name: String,
    pub description: String,
    #[serde(rename = "LocationID")]
    pub location_id: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(rename = "MachineSizeID")]
    pub machine_size_id: String,
    #[serde(rename = "SSHKeyIDs")]
    pub ssh_key_ids: Vec<String>,
    #[serde(rename = "NetworkIDs")]
    pub network_ids: Vec<String>,
    pub network_for_default_route: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network_untagged: String,
    #[serde(rename = "PreAllocatedIPs")]
    pub pre_allocated_ips: Vec<String>,
    #[serde(rename = "VolumeIDs")]
    pub volume_ids: Vec<String>,
    pub user_data: String,
    pub labels: BTreeMap<String, String>,
}

// ============================================================================
// Volumes
// ============================================================================

/// A volume. Capacity is in KiB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Volume {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "LocationID")]
    pub location_id: String,
    #[serde(rename = "FlavorID")]
    pub flavor_id: String,
    #[serde(rename = "StoragePoolID")]
    pub storage_pool_id: String,
    #[serde(rename = "VolumeCollectionID")]
    pub volume_collection_id: String,
    pub capacity: i64,
    pub shareable: bool,
    pub state: VolumeState,
    pub sub_state: VolumeSubState,
    pub status: String,
    #[serde(rename = "WWN")]
    pub wwn: String,
    pub export_count: i64,
    pub replication: bool,
    pub active_site: String,
    pub created_site: String,
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Body of `POST /volumes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewVolume {
    pub name: String,
    pub description: String,
    #[serde(rename = "LocationID")]
    pub location_id: String,
    #[serde(rename = "FlavorID")]
    pub flavor_id: String,
    #[serde(rename = "StoragePoolID", skip_serializing_if = "String::is_empty")]
    pub storage_pool_id: String,
    #[serde(rename = "VolumeCollectionID", skip_serializing_if = "String::is_empty")]
    pub volume_collection_id: String,
    pub capacity: i64,
    pub shareable: bool,
    pub labels: BTreeMap<String, String>,
}

/// Body of `PUT /volumes/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateVolume {
    #[serde(rename = "ID")]
    pub id: String,
    pub description: String,
    pub capacity: i64,
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// A volume exported to a host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeAttachment {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(rename = "HostID")]
    pub host_id: String,
    #[serde(rename = "VolumeID")]
    pub volume_id: String,
    #[serde(rename = "VolumeTargetIPAddress")]
    pub volume_target_ip_address: String,
    #[serde(rename = "VolumeTargetIQN")]
    pub volume_target_iqn: String,
}

/// Body of the attach and detach calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeAttachHost {
    #[serde(rename = "HostID")]
    pub host_id: String,
}

// ============================================================================
// Networks and IP pools
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Network {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "LocationID")]
    pub location_id: String,
    pub host_use: String,
    pub purpose: String,
    pub kind: String,
    #[serde(rename = "IPPoolID")]
    pub ip_pool_id: String,
    #[serde(rename = "VLAN")]
    pub vlan: i64,
    #[serde(rename = "VNI")]
    pub vni: i64,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// A block of addresses handed to an IP pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IpSource {
    #[serde(rename = "BaseIP")]
    pub base_ip: String,
    pub count: i64,
}

/// IP pool created together with a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewIpPool {
    pub name: String,
    pub description: String,
    #[serde(rename = "IPVersion")]
    pub ip_version: String,
    #[serde(rename = "BaseIP")]
    pub base_ip: String,
    pub netmask: String,
    pub default_route: String,
    pub sources: Vec<IpSource>,
    #[serde(rename = "DNS")]
    pub dns: Vec<String>,
    pub proxy: String,
    pub no_proxy: String,
    #[serde(rename = "NTP")]
    pub ntp: Vec<String>,
}

/// Body of `POST /networks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewNetwork {
    pub name: String,
    pub description: String,
    #[serde(rename = "LocationID")]
    pub location_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host_use: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub purpose: String,
    #[serde(rename = "NewIPPool", skip_serializing_if = "Option::is_none")]
    pub new_ip_pool: Option<NewIpPool>,
}

/// One allocation out of an IP pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IpAllocation {
    pub base: String,
    pub count: i64,
    pub usage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IpPool {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub use_records: Vec<IpAllocation>,
    #[serde(rename = "ETag")]
    pub etag: String,
}

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Profile {
    pub team_name: String,
    pub team_desc: String,
    pub company: String,
    pub address: String,
    pub email: String,
    pub email_verified: bool,
    pub phone_number: String,
    pub phone_verified: bool,
}

/// Per-project quotas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Limits {
    pub hosts: i64,
    pub volumes: i64,
    pub volume_capacity: i64,
    pub private_networks: i64,
    /// Host cap per machine size ID.
    pub instance_types: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Project {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub profile: Profile,
    pub limits: Limits,
    pub permitted_sites: Vec<String>,
    pub permitted_images: Vec<String>,
    #[serde(rename = "BootFromSANAllowed")]
    pub boot_from_san_allowed: bool,
    pub replication_allowed: bool,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Body of `POST /projects`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewProject {
    pub name: String,
    pub profile: Profile,
    pub limits: Limits,
    pub permitted_sites: Vec<String>,
    pub permitted_images: Vec<String>,
    #[serde(rename = "BootFromSANAllowed")]
    pub boot_from_san_allowed: bool,
    pub replication_allowed: bool,
}

// ============================================================================
// SSH keys and services
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SshKey {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub key: String,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Body of `POST /sshkeys`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewSshKey {
    pub name: String,
    pub key: String,
}

/// An uploaded OS service image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Service {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub flavor: String,
    pub version: String,
    pub category: String,
}

// ============================================================================
// Usage
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HostUsage {
    #[serde(rename = "HostID")]
    pub host_id: String,
    pub host_name: String,
    pub machine_size_name: String,
    #[serde(rename = "MachineSizeID")]
    pub machine_size_id: String,
    pub usage_hours: i64,
    #[serde(rename = "ProjectID")]
    pub project_id: String,
    #[serde(rename = "LocationID")]
    pub location_id: String,
    pub usage_start: Option<DateTime<Utc>>,
    pub usage_end: Option<DateTime<Utc>>,
    pub allocated: Option<DateTime<Utc>>,
    pub freed: Option<DateTime<Utc>>,
    pub ready: Option<DateTime<Utc>>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeUsage {
    #[serde(rename = "VolumeID")]
    pub volume_id: String,
    pub volume_name: String,
    pub flavor_name: String,
    #[serde(rename = "FlavorID")]
    pub flavor_id: String,
    pub capacity: i64,
    pub usage_hours: i64,
    #[serde(rename = "ProjectID")]
    pub project_id: String,
    #[serde(rename = "LocationID")]
    pub location_id: String,
    pub usage_start: Option<DateTime<Utc>>,
    pub usage_end: Option<DateTime<Utc>>,
    pub allocated: Option<DateTime<Utc>>,
    pub freed: Option<DateTime<Utc>>,
    pub ready: Option<DateTime<Utc>>,
    pub error: String,
}

/// Response of `GET /usage-reports`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UsageReport {
    pub hosts: Vec<HostUsage>,
    pub volumes: Vec<VolumeUsage>,
}
