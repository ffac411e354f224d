//! Typed resource declarations for the proxy host.
//!
//! Every resource is a plain value. Dependencies are taken by reference in
//! the constructors, so a declaration cannot exist before the resources it
//! points at.

use std::ops::Deref;

use super::user_data::BootScript;

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the wrapped value.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

newtype!(
    /// Template-local name of a resource.
    LogicalId
);
newtype!(
    /// Provider machine image identifier (for example `ami-0abc...`).
    ImageId
);

/// Address space of the proxy network.
pub const NETWORK_CIDR: &str = "10.0.0.0/16";
/// Name tag applied to the network.
pub const NETWORK_NAME: &str = "reality-proxy-vpc";
/// Source range for every ingress rule.
pub const ANY_IPV4: &str = "0.0.0.0/0";
/// Service principal allowed to assume the instance role.
pub const COMPUTE_SERVICE_PRINCIPAL: &str = "ec2.amazonaws.com";
/// Instance size used when nothing else is configured.
pub const DEFAULT_INSTANCE_TYPE: &str = "t2.micro";

/// One publicly routable subnet pinned to an availability zone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublicSubnet {
    /// Subnet resource.
    pub id: LogicalId,
    /// Subnet address range.
    pub cidr: &'static str,
    /// Index into the region's availability zone list.
    pub zone_index: u8,
    /// Route table owned by the subnet.
    pub route_table: LogicalId,
    /// Default route to the internet gateway.
    pub default_route: LogicalId,
    /// Association between the subnet and its route table.
    pub route_table_association: LogicalId,
}

impl PublicSubnet {
    fn declare(index: u8, cidr: &'static str) -> Self {
        let base = format!("VpcPublicSubnet{}", index + 1);
        Self {
            id: LogicalId::new(format!("{base}Subnet")),
            cidr,
            zone_index: index,
            route_table: LogicalId::new(format!("{base}RouteTable")),
            default_route: LogicalId::new(format!("{base}DefaultRoute")),
            route_table_association: LogicalId::new(format!("{base}RouteTableAssociation")),
        }
    }
}

/// Isolated network with public subnets in two availability zones.
///
/// No NAT gateway and no private subnet is ever declared.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Network {
    /// VPC resource.
    pub id: LogicalId,
    /// Address space of the VPC.
    pub cidr: &'static str,
    /// Name tag of the VPC.
    pub name: &'static str,
    /// Internet gateway resource.
    pub gateway: LogicalId,
    /// Attachment of the gateway to the VPC.
    pub gateway_attachment: LogicalId,
    /// Public subnets, one per availability zone.
    pub subnets: [PublicSubnet; 2],
}

impl Network {
    /// Declares the proxy network.
    #[must_use]
    pub fn declare() -> Self {
        Self {
            id: LogicalId::from("Vpc"),
            cidr: NETWORK_CIDR,
            name: NETWORK_NAME,
            gateway: LogicalId::from("VpcInternetGateway"),
            gateway_attachment: LogicalId::from("VpcGatewayAttachment"),
            subnets: [
                PublicSubnet::declare(0, "10.0.0.0/17"),
                PublicSubnet::declare(1, "10.0.128.0/17"),
            ],
        }
    }

    /// Subnet that hosts the compute instance.
    #[must_use]
    pub fn primary_subnet(&self) -> &PublicSubnet {
        let [primary, _] = &self.subnets;
        primary
    }
}

/// Ports the proxy host accepts traffic on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngressPort {
    /// TCP/443 carrying REALITY/VLESS traffic.
    Https,
    /// TCP/80 used for certificate issuance.
    Http,
}

impl IngressPort {
    /// Numeric TCP port.
    #[must_use]
    pub const fn port(self) -> u16 {
        match self {
            Self::Https => 443,
            Self::Http => 80,
        }
    }

    /// Rule description shown in the provider console.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Https => "Allow REALITY-VLESS traffic IPv4",
            Self::Http => "Allow HTTP for certificate IPv4",
        }
    }
}

/// Inbound allow rule; the source is always every IPv4 address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IngressRule {
    /// Allowed port.
    pub port: IngressPort,
}

impl IngressRule {
    /// Protocol of every rule.
    #[must_use]
    pub const fn protocol(self) -> &'static str {
        "tcp"
    }

    /// Source range of every rule.
    #[must_use]
    pub const fn source(self) -> &'static str {
        ANY_IPV4
    }
}

/// Security group owned by the network.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessPolicy {
    /// Security group resource.
    pub id: LogicalId,
    /// Network the group belongs to.
    pub network: LogicalId,
    /// Group description.
    pub description: &'static str,
    /// Inbound rules; outbound traffic is unrestricted.
    pub ingress: [IngressRule; 2],
}

impl AccessPolicy {
    /// Declares the security group for `network`.
    #[must_use]
    pub fn new(network: &Network) -> Self {
        Self {
            id: LogicalId::from("SecurityGroup"),
            network: network.id.clone(),
            description: "Allow VLESS-REALITY traffic and HTTP",
            ingress: [
                IngressRule {
                    port: IngressPort::Https,
                },
                IngressRule {
                    port: IngressPort::Http,
                },
            ],
        }
    }
}

/// Managed capabilities an identity may carry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ManagedCapability {
    /// Remote management session access through Systems Manager.
    SessionManagerCore,
}

impl ManagedCapability {
    /// Name of the provider-managed policy.
    #[must_use]
    pub const fn policy_name(self) -> &'static str {
        match self {
            Self::SessionManagerCore => "AmazonSSMManagedInstanceCore",
        }
    }
}

/// Role assumable only by the compute service, plus its instance profile.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    /// Role resource.
    pub role: LogicalId,
    /// Instance profile carrying the role.
    pub profile: LogicalId,
    /// Only principal trusted to assume the role.
    pub principal: &'static str,
    /// The single managed capability granted.
    pub capability: ManagedCapability,
}

impl Identity {
    /// Declares the session-manager-only instance role.
    #[must_use]
    pub fn declare() -> Self {
        Self {
            role: LogicalId::from("InstanceRole"),
            profile: LogicalId::from("InstanceProfile"),
            principal: COMPUTE_SERVICE_PRINCIPAL,
            capability: ManagedCapability::SessionManagerCore,
        }
    }
}

/// Instance metadata service access mode. Only session tokens are allowed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetadataAccess {
    /// Every metadata call must present a session token (IMDSv2).
    TokenRequired,
}

impl MetadataAccess {
    /// Value of the `HttpTokens` metadata option.
    #[must_use]
    pub const fn http_tokens(self) -> &'static str {
        match self {
            Self::TokenRequired => "required",
        }
    }
}

/// Key/value tag attached to a resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

/// Reference to an instance's provider id.
///
/// It can only be obtained from a declared [`ComputeInstance`] and resolves
/// to whatever id the engine allocated, including after replacement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceIdRef(LogicalId);

impl InstanceIdRef {
    /// Logical id of the referenced instance.
    #[must_use]
    pub const fn logical_id(&self) -> &LogicalId {
        &self.0
    }
}

/// The proxy virtual machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComputeInstance {
    /// Instance resource.
    pub id: LogicalId,
    /// Launch template carrying the metadata options.
    pub launch_template: LogicalId,
    /// Instance size.
    pub instance_type: String,
    /// Boot image.
    pub image: ImageId,
    /// Subnet hosting the instance.
    pub subnet: LogicalId,
    /// Security group applied to the instance.
    pub security_group: LogicalId,
    /// Instance profile attached to the instance.
    pub profile: LogicalId,
    /// Role behind the profile; the instance waits for it.
    pub role: LogicalId,
    /// First-boot script.
    pub boot_script: BootScript,
    /// Metadata service access mode.
    pub metadata_access: MetadataAccess,
    /// Tags in declaration order.
    pub tags: Vec<Tag>,
}

impl ComputeInstance {
    /// Declares the instance inside `network`'s primary subnet.
    #[must_use]
    pub fn new(
        network: &Network,
        policy: &AccessPolicy,
        identity: &Identity,
        image: ImageId,
        boot_script: BootScript,
        instance_type: impl Into<String>,
    ) -> Self {
        Self {
            id: LogicalId::from("Instance"),
            launch_template: LogicalId::from("InstanceLaunchTemplate"),
            instance_type: instance_type.into(),
            image,
            subnet: network.primary_subnet().id.clone(),
            security_group: policy.id.clone(),
            profile: identity.profile.clone(),
            role: identity.role.clone(),
            boot_script,
            metadata_access: MetadataAccess::TokenRequired,
            tags: Vec::new(),
        }
    }

    /// Adds a tag, replacing an existing tag with the same key.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let tag = Tag {
            key: key.into(),
            value: value.into(),
        };
        if let Some(existing) = self.tags.iter_mut().find(|item| item.key == tag.key) {
            *existing = tag;
        } else {
            self.tags.push(tag);
        }
        self
    }

    /// Reference to this instance's provider id.
    #[must_use]
    pub fn id_ref(&self) -> InstanceIdRef {
        InstanceIdRef(self.id.clone())
    }
}

/// Elastic IPv4 address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StaticAddress {
    /// Address resource.
    pub id: LogicalId,
}

impl StaticAddress {
    /// Declares the static address.
    #[must_use]
    pub fn allocate() -> Self {
        Self {
            id: LogicalId::from("ElasticIp"),
        }
    }
}

/// Binding of the static address to the instance id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressAssociation {
    /// Association resource.
    pub id: LogicalId,
    /// Address whose allocation id is bound.
    pub address: LogicalId,
    /// Instance the address points at.
    pub instance: InstanceIdRef,
}

impl AddressAssociation {
    /// Associates `address` with the instance behind `instance`.
    #[must_use]
    pub fn new(address: &StaticAddress, instance: InstanceIdRef) -> Self {
        Self {
            id: LogicalId::from("ElasticIpAssociation"),
            address: address.id.clone(),
            instance,
        }
    }
}
