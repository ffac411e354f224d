//! CloudFormation template synthesis.

use serde_json::{Map, Value, json};

use super::resources::{
    AccessPolicy, AddressAssociation, ComputeInstance, Identity, LogicalId, Network,
};
use super::{OutputValue, ProxyStack, StackOutput};

const FORMAT_VERSION: &str = "2010-09-09";
const DESCRIPTION: &str = "Hardened Reality/VLESS proxy host";
const EGRESS_DESCRIPTION: &str = "Allow all outbound traffic by default";

/// Synthesised CloudFormation template.
#[derive(Clone, Debug, PartialEq)]
pub struct Template(Value);

impl Template {
    /// Raw template document.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Resource body declared under `logical_id`.
    #[must_use]
    pub fn resource(&self, logical_id: &str) -> Option<&Value> {
        self.0.get("Resources").and_then(|resources| resources.get(logical_id))
    }

    /// Every resource of the given CloudFormation type, in declaration order.
    #[must_use]
    pub fn resources_of_type(&self, kind: &str) -> Vec<(&str, &Value)> {
        self.0
            .get("Resources")
            .and_then(Value::as_object)
            .map(|resources| {
                resources
                    .iter()
                    .filter(|(_, body)| body.get("Type").and_then(Value::as_str) == Some(kind))
                    .map(|(id, body)| (id.as_str(), body))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Renders the template body submitted to the engine.
    ///
    /// # Errors
    ///
    /// Returns the serialiser error when rendering fails.
    pub fn render(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.0)
    }
}

pub(super) fn synthesize(stack: &ProxyStack) -> Template {
    let mut resources = Map::new();
    network_resources(&stack.network, &mut resources);
    insert(
        &mut resources,
        &stack.access_policy.id,
        security_group(&stack.access_policy),
    );
    identity_resources(&stack.identity, &mut resources);
    instance_resources(&stack.instance, &stack.access_policy, &mut resources);
    insert(
        &mut resources,
        &stack.address.id,
        static_address(),
    );
    insert(
        &mut resources,
        &stack.association.id,
        address_association(&stack.association),
    );

    let mut outputs = Map::new();
    for output in &stack.outputs {
        outputs.insert(output.key.to_owned(), stack_output(output));
    }

    Template(json!({
        "AWSTemplateFormatVersion": FORMAT_VERSION,
        "Description": DESCRIPTION,
        "Resources": resources,
        "Outputs": outputs,
    }))
}

fn insert(resources: &mut Map<String, Value>, id: &LogicalId, body: Value) {
    resources.insert(id.as_str().to_owned(), body);
}

fn reference(id: &LogicalId) -> Value {
    json!({ "Ref": id.as_str() })
}

fn attribute(id: &LogicalId, name: &str) -> Value {
    json!({ "Fn::GetAtt": [id.as_str(), name] })
}

fn name_tag(value: &str) -> Value {
    json!([{ "Key": "Name", "Value": value }])
}

fn network_resources(network: &Network, resources: &mut Map<String, Value>) {
    insert(
        resources,
        &network.id,
        json!({
            "Type": "AWS::EC2::VPC",
            "Properties": {
                "CidrBlock": network.cidr,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
                "Tags": name_tag(network.name),
            }
        }),
    );
    insert(
        resources,
        &network.gateway,
        json!({
            "Type": "AWS::EC2::InternetGateway",
            "Properties": { "Tags": name_tag(network.name) }
        }),
    );
    insert(
        resources,
        &network.gateway_attachment,
        json!({
            "Type": "AWS::EC2::VPCGatewayAttachment",
            "Properties": {
                "VpcId": reference(&network.id),
                "InternetGatewayId": reference(&network.gateway),
            }
        }),
    );

    for subnet in &network.subnets {
        let subnet_name = format!("{}/PublicSubnet{}", network.name, subnet.zone_index + 1);
        insert(
            resources,
            &subnet.id,
            json!({
                "Type": "AWS::EC2::Subnet",
                "Properties": {
                    "VpcId": reference(&network.id),
                    "CidrBlock": subnet.cidr,
                    "AvailabilityZone": {
                        "Fn::Select": [subnet.zone_index, { "Fn::GetAZs": "" }]
                    },
                    "MapPublicIpOnLaunch": true,
                    "Tags": name_tag(&subnet_name),
                }
            }),
        );
        insert(
            resources,
            &subnet.route_table,
            json!({
                "Type": "AWS::EC2::RouteTable",
                "Properties": {
                    "VpcId": reference(&network.id),
                    "Tags": name_tag(&subnet_name),
                }
            }),
        );
        insert(
            resources,
            &subnet.route_table_association,
            json!({
                "Type": "AWS::EC2::SubnetRouteTableAssociation",
                "Properties": {
                    "RouteTableId": reference(&subnet.route_table),
                    "SubnetId": reference(&subnet.id),
                }
            }),
        );
        insert(
            resources,
            &subnet.default_route,
            json!({
                "Type": "AWS::EC2::Route",
                "Properties": {
                    "RouteTableId": reference(&subnet.route_table),
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "GatewayId": reference(&network.gateway),
                },
                "DependsOn": [network.gateway_attachment.as_str()]
            }),
        );
    }
}

fn security_group(policy: &AccessPolicy) -> Value {
    let ingress: Vec<Value> = policy
        .ingress
        .iter()
        .map(|rule| {
            json!({
                "CidrIp": rule.source(),
                "Description": rule.port.description(),
                "FromPort": rule.port.port(),
                "IpProtocol": rule.protocol(),
                "ToPort": rule.port.port(),
            })
        })
        .collect();

    json!({
        "Type": "AWS::EC2::SecurityGroup",
        "Properties": {
            "GroupDescription": policy.description,
            "VpcId": reference(&policy.network),
            "SecurityGroupEgress": [{
                "CidrIp": "0.0.0.0/0",
                "Description": EGRESS_DESCRIPTION,
                "IpProtocol": "-1",
            }],
            "SecurityGroupIngress": ingress,
        }
    })
}

fn identity_resources(identity: &Identity, resources: &mut Map<String, Value>) {
    let policy_suffix = format!(":iam::aws:policy/{}", identity.capability.policy_name());
    insert(
        resources,
        &identity.role,
        json!({
            "Type": "AWS::IAM::Role",
            "Properties": {
                "AssumeRolePolicyDocument": {
                    "Statement": [{
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Principal": { "Service": identity.principal },
                    }],
                    "Version": "2012-10-17",
                },
                "ManagedPolicyArns": [{
                    "Fn::Join": ["", ["arn:", { "Ref": "AWS::Partition" }, policy_suffix]]
                }],
            }
        }),
    );
    insert(
        resources,
        &identity.profile,
        json!({
            "Type": "AWS::IAM::InstanceProfile",
            "Properties": { "Roles": [reference(&identity.role)] }
        }),
    );
}

fn instance_resources(
    instance: &ComputeInstance,
    policy: &AccessPolicy,
    resources: &mut Map<String, Value>,
) {
    insert(
        resources,
        &instance.launch_template,
        json!({
            "Type": "AWS::EC2::LaunchTemplate",
            "Properties": {
                "LaunchTemplateData": {
                    "MetadataOptions": {
                        "HttpTokens": instance.metadata_access.http_tokens(),
                    }
                }
            }
        }),
    );

    let tags: Vec<Value> = instance
        .tags
        .iter()
        .map(|tag| json!({ "Key": tag.key, "Value": tag.value }))
        .collect();

    insert(
        resources,
        &instance.id,
        json!({
            "Type": "AWS::EC2::Instance",
            "Properties": {
                "IamInstanceProfile": reference(&instance.profile),
                "ImageId": instance.image.as_str(),
                "InstanceType": instance.instance_type,
                "LaunchTemplate": {
                    "LaunchTemplateId": reference(&instance.launch_template),
                    "Version": attribute(&instance.launch_template, "LatestVersionNumber"),
                },
                "SecurityGroupIds": [attribute(&policy.id, "GroupId")],
                "SubnetId": reference(&instance.subnet),
                "Tags": tags,
                "UserData": { "Fn::Base64": instance.boot_script.render() },
            },
            "DependsOn": [instance.role.as_str()]
        }),
    );
}

fn static_address() -> Value {
    json!({
        "Type": "AWS::EC2::EIP",
        "Properties": { "Domain": "vpc" }
    })
}

fn address_association(association: &AddressAssociation) -> Value {
    json!({
        "Type": "AWS::EC2::EIPAssociation",
        "Properties": {
            "AllocationId": attribute(&association.address, "AllocationId"),
            "InstanceId": reference(association.instance.logical_id()),
        }
    })
}

fn stack_output(output: &StackOutput) -> Value {
    let value = match &output.value {
        OutputValue::Ref(id) => reference(id),
        OutputValue::Region => json!({ "Ref": "AWS::Region" }),
        OutputValue::SessionCommand(instance) => json!({
            "Fn::Join": ["", ["aws ssm start-session --target ", reference(instance.logical_id())]]
        }),
        OutputValue::Literal(text) => Value::String(text.clone()),
    };

    json!({
        "Description": output.description,
        "Value": value,
    })
}
