//! Conversions between JSON values and ABI values, driven by declared types.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, Specifier, Word},
    json_abi::Param,
    primitives::{Address, Bytes, I256, U256, B256},
};
use serde_json::Value;
use std::str::FromStr;

use super::error::BindingError;

/// Convert call parameters given either positionally (`[v1, v2]`) or by
/// name (`{"name": v}`) into ABI values for `params`.
pub fn json_args(
    context: &str,
    params: &[Param],
    parameters: &Value,
) -> Result<Vec<DynSolValue>, BindingError> {
    let expected = || {
        params
            .iter()
            .map(|input| format!("{}: {}", input.name, input.ty))
            .collect::<Vec<_>>()
            .join(", ")
    };

    match parameters {
        Value::Null if params.is_empty() => Ok(vec![]),
        Value::Array(values) => {
            if values.len() != params.len() {
                return Err(BindingError::Encoding(format!(
                    "Parameter count mismatch for '{}': expected {} parameters, got {}.\nExpected parameters: [{}]",
                    context,
                    params.len(),
                    values.len(),
                    expected()
                )));
            }
            params
                .iter()
                .zip(values)
                .enumerate()
                .map(|(i, (param, value))| {
                    param_value(param, value).map_err(|e| {
                        BindingError::Encoding(format!(
                            "Invalid parameter #{} ('{}' of type '{}'): {}",
                            i + 1,
                            param.name,
                            param.ty,
                            e
                        ))
                    })
                })
                .collect()
        }
        Value::Object(fields) => params
            .iter()
            .map(|param| {
                let value = fields.get(&param.name).ok_or_else(|| {
                    BindingError::Encoding(format!(
                        "Missing required parameter '{}' of type '{}' for '{}'.\nExpected parameters: {{{}}}",
                        param.name,
                        param.ty,
                        context,
                        expected()
                    ))
                })?;
                param_value(param, value).map_err(|e| {
                    BindingError::Encoding(format!(
                        "Invalid parameter '{}' of type '{}': {}",
                        param.name, param.ty, e
                    ))
                })
            })
            .collect(),
        other => Err(BindingError::Encoding(format!(
            "Invalid parameter format for '{}'. Parameters must be provided as either:\n1. Array: [value1, value2, ...]\n2. Object: {{{}}}\nProvided: {}",
            context,
            expected(),
            other
        ))),
    }
}

fn param_value(param: &Param, value: &Value) -> Result<DynSolValue, String> {
    let ty = param.resolve().map_err(|e| e.to_string())?;
    json_to_value(value, &ty)
}

/// Convert a JSON value into an ABI value of type `ty`.
///
/// Integers may be JSON numbers, decimal strings or `0x` hex strings; byte
/// types are hex strings; tuples take arrays.
pub fn json_to_value(value: &Value, ty: &DynSolType) -> Result<DynSolValue, String> {
    match ty {
        DynSolType::Address => {
            let s = value.as_str().ok_or("Address must be a string")?;
            let address = Address::from_str(s.trim()).map_err(|e| format!("Invalid address: {}", e))?;
            Ok(DynSolValue::Address(address))
        }
        DynSolType::Bool => value
            .as_bool()
            .map(DynSolValue::Bool)
            .ok_or_else(|| "Bool parameter must be a boolean".to_string()),
        DynSolType::Uint(bits) => {
            let num = parse_uint(value)?;
            if *bits < 256 && num.bit_len() > *bits {
                return Err(format!("Value {} does not fit in uint{}", num, bits));
            }
            Ok(DynSolValue::Uint(num, *bits))
        }
        DynSolType::Int(bits) => {
            let num = parse_int(value)?;
            if *bits < 256 {
                let bound = I256::ONE << (*bits - 1);
                if num >= bound || num < -bound {
                    return Err(format!("Value {} does not fit in int{}", num, bits));
                }
            }
            Ok(DynSolValue::Int(num, *bits))
        }
        DynSolType::String => value
            .as_str()
            .map(|s| DynSolValue::String(s.to_string()))
            .ok_or_else(|| "String parameter must be a string".to_string()),
        DynSolType::Bytes => Ok(DynSolValue::Bytes(parse_hex(value)?)),
        DynSolType::FixedBytes(size) => {
            let bytes = parse_hex(value)?;
            if bytes.len() != *size {
                return Err(format!(
                    "Expected {} bytes for bytes{}, got {}",
                    size,
                    size,
                    bytes.len()
                ));
            }
            let mut word = [0u8; 32];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(Word::from(word), *size))
        }
        DynSolType::Array(inner) => {
            let items = value.as_array().ok_or("Array parameter must be an array")?;
            let values = items
                .iter()
                .map(|item| json_to_value(item, inner))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DynSolValue::Array(values))
        }
        DynSolType::FixedArray(inner, len) => {
            let items = value.as_array().ok_or("Array parameter must be an array")?;
            if items.len() != *len {
                return Err(format!("Expected {} array elements, got {}", len, items.len()));
            }
            let values = items
                .iter()
                .map(|item| json_to_value(item, inner))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DynSolValue::FixedArray(values))
        }
        DynSolType::Tuple(types) => {
            let items = value.as_array().ok_or("Tuple parameter must be an array")?;
            if items.len() != types.len() {
                return Err(format!(
                    "Expected {} tuple components, got {}",
                    types.len(),
                    items.len()
                ));
            }
            let values = items
                .iter()
                .zip(types)
                .map(|(item, ty)| json_to_value(item, ty))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DynSolValue::Tuple(values))
        }
        other => Err(format!("Unsupported Solidity type: {}", other)),
    }
}

fn parse_uint(value: &Value) -> Result<U256, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| format!("Invalid uint value: {}", n)),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => U256::from_str_radix(hex, 16),
            None => U256::from_str_radix(s, 10),
        }
        .map_err(|_| format!("Invalid uint string: {}", s)),
        _ => Err("Uint must be a number or string".to_string()),
    }
}

fn parse_int(value: &Value) -> Result<I256, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|i| I256::try_from(i).ok())
            .ok_or_else(|| format!("Invalid int value: {}", n)),
        Value::String(s) => {
            I256::from_dec_str(s).map_err(|_| format!("Invalid int string: {}", s))
        }
        _ => Err("Int must be a number or string".to_string()),
    }
}

fn parse_hex(value: &Value) -> Result<Vec<u8>, String> {
    let hex_str = value.as_str().ok_or("Bytes must be a hex string")?;
    hex::decode(hex_str.trim_start_matches("0x")).map_err(|_| format!("Invalid hex string: {}", hex_str))
}

/// Convert an ABI value to JSON. Integers become decimal strings and byte
/// values become `0x` hex.
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Address(addr) => Value::String(addr.to_checksum(None)),
        DynSolValue::Uint(num, _) => Value::String(num.to_string()),
        DynSolValue::Int(num, _) => Value::String(num.to_string()),
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        other => Value::String(format!("{:?}", other)),
    }
}

pub fn into_address(value: DynSolValue) -> Result<Address, BindingError> {
    match value {
        DynSolValue::Address(address) => Ok(address),
        other => Err(mismatch("address", &other)),
    }
}

pub fn into_uint(value: DynSolValue) -> Result<U256, BindingError> {
    match value {
        DynSolValue::Uint(num, _) => Ok(num),
        other => Err(mismatch("uint", &other)),
    }
}

pub fn into_string(value: DynSolValue) -> Result<String, BindingError> {
    match value {
        DynSolValue::String(s) => Ok(s),
        other => Err(mismatch("string", &other)),
    }
}

pub fn into_bytes(value: DynSolValue) -> Result<Bytes, BindingError> {
    match value {
        DynSolValue::Bytes(bytes) => Ok(bytes.into()),
        other => Err(mismatch("bytes", &other)),
    }
}

/// A 32-byte word, as produced by `bytes32` values and hashed indexed topics.
pub fn into_word(value: DynSolValue) -> Result<B256, BindingError> {
    match value {
        DynSolValue::FixedBytes(word, 32) => Ok(word),
        other => Err(mismatch("bytes32", &other)),
    }
}

pub fn into_tuple(value: DynSolValue, arity: usize) -> Result<Vec<DynSolValue>, BindingError> {
    match value {
        DynSolValue::Tuple(items) if items.len() == arity => Ok(items),
        other => Err(mismatch(&format!("tuple of {}", arity), &other)),
    }
}

pub fn into_array(value: DynSolValue) -> Result<Vec<DynSolValue>, BindingError> {
    match value {
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => Ok(items),
        other => Err(mismatch("array", &other)),
    }
}

fn mismatch(expected: &str, got: &DynSolValue) -> BindingError {
    BindingError::Decoding(format!("expected {} value, got {:?}", expected, got))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ty(s: &str) -> DynSolType {
        DynSolType::parse(s).unwrap()
    }

    #[test]
    fn test_integer_parsing() {
        assert_eq!(
            json_to_value(&json!(42), &ty("uint256")).unwrap(),
            DynSolValue::Uint(U256::from(42), 256)
        );
        assert_eq!(
            json_to_value(&json!("0x10"), &ty("uint64")).unwrap(),
            DynSolValue::Uint(U256::from(16), 64)
        );
        assert_eq!(
            json_to_value(&json!("1000"), &ty("uint256")).unwrap(),
            DynSolValue::Uint(U256::from(1000), 256)
        );
        assert!(json_to_value(&json!(256), &ty("uint8")).is_err());
        assert_eq!(
            json_to_value(&json!(-5), &ty("int16")).unwrap(),
            DynSolValue::Int(I256::try_from(-5i64).unwrap(), 16)
        );
        assert!(json_to_value(&json!(128), &ty("int8")).is_err());
        assert!(json_to_value(&json!(true), &ty("uint256")).is_err());
    }

    #[test]
    fn test_bytes_and_addresses() {
        let addr = "0x742d35Cc6435C9c1c72c5E7b18BaB7e1DB7a5d6e";
        assert!(matches!(
            json_to_value(&json!(addr), &ty("address")).unwrap(),
            DynSolValue::Address(_)
        ));
        assert_eq!(
            json_to_value(&json!("0xdeadbeef"), &ty("bytes")).unwrap(),
            DynSolValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert!(json_to_value(&json!("0xdead"), &ty("bytes4")).is_err());
        let fixed = json_to_value(&json!("0xdeadbeef"), &ty("bytes4")).unwrap();
        assert_eq!(value_to_json(&fixed), json!("0xdeadbeef"));
    }

    #[test]
    fn test_composites() {
        let value = json_to_value(&json!([["0x742d35Cc6435C9c1c72c5E7b18BaB7e1DB7a5d6e", "a", 1]]), &ty("(address,string,uint256)[]")).unwrap();
        let items = into_array(value).unwrap();
        let fields = into_tuple(items[0].clone(), 3).unwrap();
        assert_eq!(into_string(fields[1].clone()).unwrap(), "a");
        assert!(json_to_value(&json!([1, 2]), &ty("uint8[3]")).is_err());
    }

    #[test]
    fn test_json_args_positional_and_named() {
        let params: Vec<Param> = serde_json::from_value(json!([
            {"name": "name", "type": "string"},
            {"name": "longevity", "type": "uint256"}
        ]))
        .unwrap();

        let positional = json_args("createSecret", &params, &json!(["x", 5])).unwrap();
        let named = json_args("createSecret", &params, &json!({"longevity": 5, "name": "x"})).unwrap();
        assert_eq!(positional, named);

        assert!(matches!(
            json_args("createSecret", &params, &json!(["x"])),
            Err(BindingError::Encoding(_))
        ));
        assert!(matches!(
            json_args("createSecret", &params, &json!({"name": "x"})),
            Err(BindingError::Encoding(_))
        ));
        assert!(json_args("refreshSecrets", &[], &Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(
            value_to_json(&DynSolValue::Uint(U256::from(7), 256)),
            json!("7")
        );
        assert_eq!(
            value_to_json(&DynSolValue::Tuple(vec![
                DynSolValue::Bool(true),
                DynSolValue::String("hi".into())
            ])),
            json!([true, "hi"])
        );
    }

    #[test]
    fn test_typed_extraction_mismatch() {
        assert!(matches!(
            into_uint(DynSolValue::Bool(true)),
            Err(BindingError::Decoding(_))
        ));
        assert_eq!(
            into_word(DynSolValue::FixedBytes(B256::repeat_byte(1), 32)).unwrap(),
            B256::repeat_byte(1)
        );
    }
}
