//! Declarative resource graph for the proxy host.
//!
//! [`ProxyStack::declare`] assembles the typed resources in dependency order
//! and [`ProxyStack::synthesize`] renders them as a CloudFormation template,
//! which the engine creates or updates as a unit.

mod resources;
mod template;
mod user_data;

pub use resources::{
    ANY_IPV4, AccessPolicy, AddressAssociation, COMPUTE_SERVICE_PRINCIPAL, ComputeInstance,
    DEFAULT_INSTANCE_TYPE, Identity, ImageId, IngressPort, IngressRule, InstanceIdRef, LogicalId,
    ManagedCapability, MetadataAccess, NETWORK_CIDR, NETWORK_NAME, Network, PublicSubnet,
    StaticAddress, Tag,
};
pub use template::Template;
pub use user_data::{BootScript, INSTALLER_URL, SETUP_COMPLETE_MARKER, installer_invocation};

use crate::outputs::{
    CONFIG_INSTRUCTIONS_KEY, INSTANCE_ID_KEY, PROXY_IP_KEY, REGION_KEY, SESSION_MANAGER_ACCESS_KEY,
};

/// Stack name used when nothing else is configured.
pub const DEFAULT_STACK_NAME: &str = "VlessProxyStack";

/// `Name` tag applied to the instance.
pub const INSTANCE_NAME: &str = "Reality-VLESS-Server";

/// `Purpose` tag applied to the instance.
pub const INSTANCE_PURPOSE: &str = "Hardened Reality/VLESS protocol proxy server";

/// Inputs that vary between deployments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackSettings {
    /// Instance size.
    pub instance_type: String,
    /// Boot image resolved at provisioning time.
    pub image: ImageId,
}

/// Value of a stack output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OutputValue {
    /// Default reference value of a resource.
    Ref(LogicalId),
    /// Region the stack is deployed to.
    Region,
    /// Ready-to-run session manager command for the instance.
    SessionCommand(InstanceIdRef),
    /// Fixed text.
    Literal(String),
}

/// Named fact exported by the stack once it settles.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackOutput {
    /// Output key, also the key in the persisted outputs file.
    pub key: &'static str,
    /// Exported value.
    pub value: OutputValue,
    /// Human-readable description.
    pub description: &'static str,
}

/// Complete resource graph of one proxy deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProxyStack {
    /// VPC, gateway, and public subnets.
    pub network: Network,
    /// Security group.
    pub access_policy: AccessPolicy,
    /// Role and instance profile.
    pub identity: Identity,
    /// Proxy instance.
    pub instance: ComputeInstance,
    /// Elastic IP.
    pub address: StaticAddress,
    /// Elastic IP association.
    pub association: AddressAssociation,
    /// Exported facts.
    pub outputs: Vec<StackOutput>,
}

impl ProxyStack {
    /// Declares the full graph for `settings`.
    #[must_use]
    pub fn declare(settings: StackSettings) -> Self {
        let network = Network::declare();
        let access_policy = AccessPolicy::new(&network);
        let identity = Identity::declare();
        let instance = ComputeInstance::new(
            &network,
            &access_policy,
            &identity,
            settings.image,
            BootScript::proxy_installer(),
            settings.instance_type,
        )
        .tag("Name", INSTANCE_NAME)
        .tag("Purpose", INSTANCE_PURPOSE);
        let address = StaticAddress::allocate();
        let association = AddressAssociation::new(&address, instance.id_ref());
        let outputs = declare_outputs(&address, &instance);

        Self {
            network,
            access_policy,
            identity,
            instance,
            address,
            association,
            outputs,
        }
    }

    /// Renders the graph as a CloudFormation template.
    #[must_use]
    pub fn synthesize(&self) -> Template {
        template::synthesize(self)
    }
}

fn declare_outputs(address: &StaticAddress, instance: &ComputeInstance) -> Vec<StackOutput> {
    vec![
        StackOutput {
            key: PROXY_IP_KEY,
            value: OutputValue::Ref(address.id.clone()),
            description: "Static IP address for your Reality proxy",
        },
        StackOutput {
            key: INSTANCE_ID_KEY,
            value: OutputValue::Ref(instance.id.clone()),
            description: "EC2 Instance ID",
        },
        StackOutput {
            key: REGION_KEY,
            value: OutputValue::Region,
            description: "AWS Region where the proxy is deployed",
        },
        StackOutput {
            key: SESSION_MANAGER_ACCESS_KEY,
            value: OutputValue::SessionCommand(instance.id_ref()),
            description: "Use AWS Systems Manager Session Manager to access the instance",
        },
        StackOutput {
            key: CONFIG_INSTRUCTIONS_KEY,
            value: OutputValue::Literal(String::from(
                "Run 'reality-proxy fetch-config' to get your Reality configuration",
            )),
            description: "How to get your Reality configuration",
        },
    ]
}
