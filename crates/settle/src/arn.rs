//! Amazon Resource Names.
use snafu::prelude::*;

use crate::{Error, MalformedArnSnafu, MalformedIdSnafu, Result};

/// A parsed ARN, `arn:partition:service:region:account-id:resource`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource: String,
}

impl core::str::FromStr for Arn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let sections: Vec<&str> = s.splitn(6, ':').collect();
        ensure!(
            sections.len() == 6,
            MalformedArnSnafu {
                arn: s,
                reason: "not enough sections",
            }
        );
        ensure!(
            sections[0] == "arn",
            MalformedArnSnafu {
                arn: s,
                reason: "must start with 'arn:'",
            }
        );
        ensure!(
            !sections[1].is_empty() && !sections[2].is_empty(),
            MalformedArnSnafu {
                arn: s,
                reason: "partition and service are required",
            }
        );
        ensure!(
            !sections[5].is_empty(),
            MalformedArnSnafu {
                arn: s,
                reason: "resource is required",
            }
        );
        Ok(Arn {
            partition: sections[1].to_owned(),
            service: sections[2].to_owned(),
            region: sections[3].to_owned(),
            account_id: sections[4].to_owned(),
            resource: sections[5].to_owned(),
        })
    }
}

impl core::fmt::Display for Arn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

impl Arn {
    /// The resource section split on `/`.
    pub fn resource_parts(&self) -> Vec<&str> {
        self.resource.split('/').collect()
    }
}

/// Workspace id and namespace name of a rule groups namespace ARN,
/// `arn:aws:aps:<region>:<account>:rulegroupsnamespace/<workspace>/<name>`.
pub fn rule_groups_namespace_ids(arn: &str) -> Result<(String, String)> {
    let parsed: Arn = arn.parse()?;
    let parts = parsed.resource_parts();
    ensure!(
        parts.len() == 3 && parts[0] == "rulegroupsnamespace" && !parts[1].is_empty() && !parts[2].is_empty(),
        MalformedIdSnafu {
            id: arn,
            expected: "rulegroupsnamespace/<workspace-id>/<name>",
        }
    );
    Ok((parts[1].to_owned(), parts[2].to_owned()))
}
