use std::fmt;
use std::str::FromStr;

use crate::ReconcileError;

/// Separator between tenant and resource id in the encoded form.
pub const ID_DELIMITER: char = '_';

/// Composite key addressing one reconciliation unit.
///
/// Encodes as `{tenant_id}_{resource_id}`. Tenant ids never contain the
/// delimiter, so decoding splits on its first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcilerId {
    tenant_id: String,
    resource_id: String,
}

impl ReconcilerId {
    pub fn new(tenant_id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            resource_id: resource_id.into(),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Encoded form used as the request key.
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.tenant_id, ID_DELIMITER, self.resource_id)
    }
}

impl FromStr for ReconcilerId {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(ID_DELIMITER) {
            Some((tenant, resource)) if !tenant.is_empty() && !resource.is_empty() => {
                Ok(Self::new(tenant, resource))
            }
            _ => Err(ReconcileError::InvalidId(s.to_string())),
        }
    }
}

impl fmt::Display for ReconcilerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[tenantID={}, resourceID={}]",
            self.tenant_id, self.resource_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let id = ReconcilerId::new("11111111-2222-3333-4444-555555555555", "inst-0123abcd");
        assert_eq!(
            id.encode(),
            "11111111-2222-3333-4444-555555555555_inst-0123abcd"
        );

        let parsed: ReconcilerId = id.encode().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.tenant_id(), "11111111-2222-3333-4444-555555555555");
        assert_eq!(parsed.resource_id(), "inst-0123abcd");
    }

    #[test]
    fn test_decode_rejects_missing_parts() {
        assert!("no-delimiter".parse::<ReconcilerId>().is_err());
        assert!("_inst-1".parse::<ReconcilerId>().is_err());
        assert!("tenant_".parse::<ReconcilerId>().is_err());
    }

    #[test]
    fn test_display() {
        let id = ReconcilerId::new("t1", "host-1");
        assert_eq!(id.to_string(), "[tenantID=t1, resourceID=host-1]");
    }
}
