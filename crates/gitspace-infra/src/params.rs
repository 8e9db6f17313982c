//! Encoding of provisioning parameter lists.
//!
//! Parameter lists are persisted in the `input_params` column of a provisioned
//! record and in template data as a JSON array of `{"name", "value"}` objects.

use gitspace_store::InfraProviderParameter;

use crate::Result;

/// Encode a parameter list, preserving order.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn params_to_string(params: &[InfraProviderParameter]) -> Result<String> {
    Ok(serde_json::to_string(params)?)
}

/// Decode a parameter list produced by [`params_to_string`].
///
/// An empty or whitespace-only input decodes to an empty list.
///
/// # Errors
///
/// Returns an error if the input is not a JSON array of name/value objects.
pub fn string_to_params(encoded: &str) -> Result<Vec<InfraProviderParameter>> {
    if encoded.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(encoded)?)
}

/// Look up the value of a parameter by name.
#[must_use]
pub fn param_value<'a>(params: &'a [InfraProviderParameter], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_order() {
        let params = vec![
            InfraProviderParameter::new("zone", "us-east1-b"),
            InfraProviderParameter::new("image", "ubuntu:24.04"),
            InfraProviderParameter::new("zone", "duplicate names survive"),
            InfraProviderParameter::new("quote", "a \"quoted\" value"),
        ];
        let encoded = params_to_string(&params).unwrap();
        assert_eq!(string_to_params(&encoded).unwrap(), params);
    }

    #[test]
    fn empty_input_is_empty_list() {
        assert!(string_to_params("").unwrap().is_empty());
        assert!(string_to_params("[]").unwrap().is_empty());
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(string_to_params("{\"name\":\"x\"}").is_err());
    }

    #[test]
    fn lookup_by_name() {
        let params = vec![InfraProviderParameter::new("image", "ubuntu")];
        assert_eq!(param_value(&params, "image"), Some("ubuntu"));
        assert_eq!(param_value(&params, "zone"), None);
    }
}
