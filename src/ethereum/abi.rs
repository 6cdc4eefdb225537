use alloy::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt, Specifier},
    json_abi::{Event, Function, JsonAbi, Param},
    primitives::Bytes,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use super::{error::BindingError, CallOutput};

/// A parsed contract interface plus its optional deployable bytecode.
///
/// Every parameter type in the ABI is resolved at construction, so a
/// descriptor that exists is always usable for encoding and decoding.
#[derive(Debug, Clone)]
pub struct InterfaceDescriptor {
    abi: JsonAbi,
    bytecode: Option<Bytes>,
}

/// Hardhat / Foundry build artifact.
#[derive(Deserialize)]
struct Artifact {
    abi: JsonAbi,
    #[serde(default)]
    bytecode: Option<ArtifactBytecode>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArtifactBytecode {
    Hex(String),
    Object { object: String },
}

impl InterfaceDescriptor {
    pub fn new(abi: JsonAbi, bytecode: Option<Bytes>) -> Result<Self, BindingError> {
        validate_types(&abi)?;
        Ok(Self { abi, bytecode })
    }

    /// Parse a standard ABI JSON array.
    pub fn from_json(abi_json: &str) -> Result<Self, BindingError> {
        let abi: JsonAbi = serde_json::from_str(abi_json)
            .map_err(|e| BindingError::Descriptor(format!("Failed to parse ABI JSON: {}", e)))?;
        Self::new(abi, None)
    }

    /// Parse an ABI JSON array together with hex-encoded constructor bytecode.
    pub fn from_parts(abi_json: &str, bytecode_hex: &str) -> Result<Self, BindingError> {
        let mut descriptor = Self::from_json(abi_json)?;
        descriptor.bytecode = parse_bytecode(bytecode_hex)?;
        Ok(descriptor)
    }

    /// Parse a build artifact object with `abi` and `bytecode` fields.
    pub fn from_artifact(artifact_json: &str) -> Result<Self, BindingError> {
        let artifact: Artifact = serde_json::from_str(artifact_json).map_err(|e| {
            BindingError::Descriptor(format!("Failed to parse contract artifact: {}", e))
        })?;

        let bytecode = match artifact.bytecode {
            Some(ArtifactBytecode::Hex(hex)) | Some(ArtifactBytecode::Object { object: hex }) => {
                parse_bytecode(&hex)?
            }
            None => None,
        };

        Self::new(artifact.abi, bytecode)
    }

    /// Load a descriptor from disk, accepting either a bare ABI array or an artifact.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BindingError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            BindingError::Descriptor(format!("Failed to read ABI file {:?}: {}", path, e))
        })?;

        if content.trim_start().starts_with('[') {
            Self::from_json(&content)
        } else {
            Self::from_artifact(&content)
        }
    }

    pub const fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    pub const fn bytecode(&self) -> Option<&Bytes> {
        self.bytecode.as_ref()
    }

    /// Find a function by name (or full signature) and argument count.
    pub fn function(&self, name: &str, arity: usize) -> Result<&Function, BindingError> {
        if name.contains('(') {
            return self
                .abi
                .functions()
                .find(|f| f.signature() == name)
                .ok_or_else(|| BindingError::UnknownFunction(name.to_string()));
        }

        let overloads = self
            .abi
            .function(name)
            .ok_or_else(|| BindingError::UnknownFunction(name.to_string()))?;

        overloads
            .iter()
            .find(|f| f.inputs.len() == arity)
            .ok_or_else(|| {
                let expected: Vec<String> = overloads.iter().map(|f| f.signature()).collect();
                BindingError::Encoding(format!(
                    "Parameter count mismatch for function '{}': got {} parameters. Expected one of: {}",
                    name,
                    arity,
                    expected.join(", ")
                ))
            })
    }

    /// Find an event by name (or full signature). An overloaded event must be
    /// named by its signature.
    pub fn event(&self, name: &str) -> Result<&Event, BindingError> {
        if name.contains('(') {
            return self
                .abi
                .events()
                .find(|e| e.signature() == name)
                .ok_or_else(|| BindingError::UnknownEvent(name.to_string()));
        }

        match self.abi.event(name).map(Vec::as_slice) {
            Some([event]) => Ok(event),
            Some(overloads) if !overloads.is_empty() => {
                let candidates: Vec<String> = overloads.iter().map(|e| e.signature()).collect();
                Err(BindingError::Encoding(format!(
                    "Event '{}' is overloaded. Use one of: {}",
                    name,
                    candidates.join(", ")
                )))
            }
            _ => Err(BindingError::UnknownEvent(name.to_string())),
        }
    }

    /// Encode selector and arguments for a function call.
    pub fn encode_call(
        &self,
        name: &str,
        args: &[DynSolValue],
    ) -> Result<(&Function, Bytes), BindingError> {
        let function = self.function(name, args.len())?;
        check_args(&function.name, &function.inputs, args)?;

        let encoded = function.abi_encode_input(args).map_err(|e| {
            BindingError::Encoding(format!("Failed to encode inputs for '{}': {}", name, e))
        })?;

        Ok((function, encoded.into()))
    }

    /// Decode call return data into the function's declared output shape.
    pub fn decode_output(
        &self,
        function: &Function,
        data: &[u8],
    ) -> Result<CallOutput, BindingError> {
        if data.is_empty() && !function.outputs.is_empty() {
            return Err(BindingError::Decoding(format!(
                "Empty return data from '{}'. Is a contract deployed at this address?",
                function.name
            )));
        }

        let values = function.abi_decode_output(data, true).map_err(|e| {
            BindingError::Decoding(format!(
                "Failed to decode output of '{}': {}",
                function.name, e
            ))
        })?;

        let names: Vec<String> = function.outputs.iter().map(|o| o.name.clone()).collect();
        Ok(CallOutput::from_outputs(&names, values))
    }

    /// Bytecode followed by the encoded constructor arguments.
    pub fn deploy_data(&self, args: &[DynSolValue]) -> Result<Bytes, BindingError> {
        let code = self.bytecode.as_ref().ok_or(BindingError::NoDeployCode)?;
        let mut data = code.to_vec();

        match self.abi.constructor() {
            Some(constructor) => {
                check_args("constructor", &constructor.inputs, args)?;
                let encoded = constructor.abi_encode_input(args).map_err(|e| {
                    BindingError::Encoding(format!("Failed to encode constructor inputs: {}", e))
                })?;
                data.extend_from_slice(&encoded);
            }
            None if !args.is_empty() => {
                return Err(BindingError::Encoding(format!(
                    "Contract has no constructor but {} arguments were given",
                    args.len()
                )));
            }
            None => {}
        }

        Ok(data.into())
    }
}

fn parse_bytecode(hex_str: &str) -> Result<Option<Bytes>, BindingError> {
    let trimmed = hex_str.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if trimmed.is_empty() {
        return Ok(None);
    }

    let code = hex::decode(trimmed)
        .map_err(|e| BindingError::Descriptor(format!("Invalid bytecode hex: {}", e)))?;
    Ok(Some(code.into()))
}

fn check_args(context: &str, params: &[Param], args: &[DynSolValue]) -> Result<(), BindingError> {
    if params.len() != args.len() {
        let expected: Vec<String> = params
            .iter()
            .map(|p| format!("{} {}", p.ty, p.name))
            .collect();
        return Err(BindingError::Encoding(format!(
            "Parameter count mismatch for '{}': expected {} parameters, got {}.\nExpected parameters: [{}]",
            context,
            params.len(),
            args.len(),
            expected.join(", ")
        )));
    }

    for (i, (param, arg)) in params.iter().zip(args).enumerate() {
        let ty = param
            .resolve()
            .map_err(|e| BindingError::Descriptor(e.to_string()))?;
        if !ty.matches(arg) {
            return Err(BindingError::Encoding(format!(
                "Invalid parameter #{} ('{}' of type '{}') for '{}': got {:?}",
                i + 1,
                param.name,
                param.ty,
                context,
                arg
            )));
        }
    }

    Ok(())
}

fn validate_types(abi: &JsonAbi) -> Result<(), BindingError> {
    let unsupported = |owner: &str, name: &str, ty: &str, e: alloy::dyn_abi::Error| {
        BindingError::Descriptor(format!(
            "{}: parameter '{}' has unsupported type '{}': {}",
            owner, name, ty, e
        ))
    };

    for function in abi.functions() {
        for param in function.inputs.iter().chain(&function.outputs) {
            param
                .resolve()
                .map_err(|e| unsupported(&function.name, &param.name, &param.ty, e))?;
        }
    }

    for event in abi.events() {
        for param in &event.inputs {
            param
                .resolve()
                .map_err(|e| unsupported(&event.name, &param.name, &param.ty, e))?;
        }
    }

    for error in abi.errors() {
        for param in &error.inputs {
            param
                .resolve()
                .map_err(|e| unsupported(&error.name, &param.name, &param.ty, e))?;
        }
    }

    if let Some(constructor) = abi.constructor() {
        for param in &constructor.inputs {
            param
                .resolve()
                .map_err(|e| unsupported("constructor", &param.name, &param.ty, e))?;
        }
    }

    Ok(())
}

/// ABI source configuration
#[derive(Debug, Clone)]
pub struct AbiSource {
    pub etherscan_api_key: Option<String>,
    pub cache_dir: PathBuf,
}

impl Default for AbiSource {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("contract-bind")
            .join("abi-cache");

        Self {
            etherscan_api_key: std::env::var("ETHERSCAN_API_KEY").ok(),
            cache_dir,
        }
    }
}

/// Resolves descriptors for deployed contracts from verified explorer ABIs,
/// with a memory and disk cache in front.
#[derive(Debug)]
pub struct AbiResolver {
    client: Client,
    config: AbiSource,
    memory_cache: HashMap<String, Arc<InterfaceDescriptor>>,
}

impl AbiResolver {
    pub fn new(config: AbiSource) -> Self {
        Self {
            client: Client::new(),
            config,
            memory_cache: HashMap::new(),
        }
    }

    fn cache_key(address: &str, network: Option<&str>) -> String {
        format!("{}_{}", network.unwrap_or("mainnet"), address.to_lowercase())
    }

    /// Get a descriptor for a contract, trying cache first, then Etherscan
    pub async fn resolve(
        &mut self,
        address: &str,
        network: Option<&str>,
    ) -> Result<Arc<InterfaceDescriptor>, BindingError> {
        let cache_key = Self::cache_key(address, network);

        if let Some(descriptor) = self.memory_cache.get(&cache_key) {
            debug!("ABI cache hit for {}", address);
            return Ok(descriptor.clone());
        }

        if let Ok(abi) = self.load_cached_abi(&cache_key).await {
            debug!("ABI disk cache hit for {}", address);
            let descriptor = Arc::new(InterfaceDescriptor::new(abi, None)?);
            self.memory_cache.insert(cache_key, descriptor.clone());
            return Ok(descriptor);
        }

        info!("Fetching ABI from Etherscan for {}", address);
        let abi = self.fetch_from_etherscan(address, network).await?;
        let descriptor = Arc::new(InterfaceDescriptor::new(abi.clone(), None)?);

        if let Err(e) = self.cache_abi(&cache_key, &abi).await {
            warn!("Failed to cache ABI for {}: {}", address, e);
        }

        self.memory_cache.insert(cache_key, descriptor.clone());
        Ok(descriptor)
    }

    async fn fetch_from_etherscan(
        &self,
        address: &str,
        network: Option<&str>,
    ) -> Result<JsonAbi, BindingError> {
        let base_url = match network.unwrap_or("mainnet") {
            "mainnet" | "ethereum" => "https://api.etherscan.io",
            "sepolia" => "https://api-sepolia.etherscan.io",
            "polygon" => "https://api.polygonscan.com",
            "arbitrum" => "https://api.arbiscan.io",
            "optimism" => "https://api-optimistic.etherscan.io",
            other => {
                return Err(BindingError::Descriptor(format!(
                    "Unsupported network for Etherscan: {}",
                    other
                )))
            }
        };

        let mut url = format!(
            "{}/api?module=contract&action=getabi&address={}&format=json",
            base_url,
            address.to_lowercase()
        );

        if let Some(api_key) = &self.config.etherscan_api_key {
            url.push_str(&format!("&apikey={}", api_key));
        }

        let response: Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BindingError::transport(anyhow::anyhow!("Failed to fetch from Etherscan: {}", e)))?
            .json()
            .await
            .map_err(|e| {
                BindingError::transport(anyhow::anyhow!("Failed to parse Etherscan response: {}", e))
            })?;

        if response["status"] != "1" {
            let message = response["message"].as_str().unwrap_or("Unknown error");
            return Err(BindingError::transport(anyhow::anyhow!(
                "Etherscan API error: {}",
                message
            )));
        }

        let abi_str = response["result"]
            .as_str()
            .ok_or_else(|| BindingError::Descriptor("No ABI found in response".to_string()))?;

        if abi_str == "Contract source code not verified" {
            return Err(BindingError::Descriptor(
                "Contract source code is not verified on Etherscan".to_string(),
            ));
        }

        serde_json::from_str(abi_str)
            .map_err(|e| BindingError::Descriptor(format!("Failed to parse ABI JSON: {}", e)))
    }

    async fn load_cached_abi(&self, cache_key: &str) -> anyhow::Result<JsonAbi> {
        let cache_path = self.config.cache_dir.join(format!("{}.json", cache_key));
        let content = fs::read_to_string(&cache_path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn cache_abi(&self, cache_key: &str, abi: &JsonAbi) -> anyhow::Result<()> {
        if !self.config.cache_dir.exists() {
            fs::create_dir_all(&self.config.cache_dir).await?;
        }

        let cache_path = self.config.cache_dir.join(format!("{}.json", cache_key));
        fs::write(&cache_path, serde_json::to_string_pretty(abi)?).await?;

        debug!("Cached ABI to {:?}", cache_path);
        Ok(())
    }

    /// Register a descriptor manually (for unverified contracts)
    pub fn add_manual(
        &mut self,
        address: &str,
        network: Option<&str>,
        descriptor: Arc<InterfaceDescriptor>,
    ) {
        self.memory_cache
            .insert(Self::cache_key(address, network), descriptor);
        info!("Added manual ABI for {}", address);
    }

    /// Check if a descriptor is available without fetching
    pub fn has_abi(&self, address: &str, network: Option<&str>) -> bool {
        let cache_key = Self::cache_key(address, network);
        self.memory_cache.contains_key(&cache_key)
            || self
                .config
                .cache_dir
                .join(format!("{}.json", cache_key))
                .exists()
    }

    pub async fn clear_cache(&mut self) -> anyhow::Result<()> {
        self.memory_cache.clear();

        if self.config.cache_dir.exists() {
            fs::remove_dir_all(&self.config.cache_dir).await?;
        }

        info!("Cleared ABI cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::test_utils::{MESSAGE_BOX_ABI, RECORDER_ABI};
    use alloy::primitives::{Address, U256};
    use tempfile::tempdir;

    #[test]
    fn test_descriptor_accepts_supported_types() {
        let descriptor = InterfaceDescriptor::from_json(RECORDER_ABI).unwrap();
        assert!(descriptor.bytecode().is_none());
        assert!(descriptor.event("Created").is_ok());
        assert!(descriptor.function("record", 2).is_ok());
    }

    #[test]
    fn test_descriptor_rejects_malformed_json() {
        let err = InterfaceDescriptor::from_json("[{\"type\":").unwrap_err();
        assert!(matches!(err, BindingError::Descriptor(_)));
    }

    #[test]
    fn test_descriptor_rejects_unknown_types() {
        let abi = r#"[{"type":"function","name":"f","inputs":[{"name":"x","type":"uint7"}],"outputs":[],"stateMutability":"view"}]"#;
        let err = InterfaceDescriptor::from_json(abi).unwrap_err();
        assert!(matches!(err, BindingError::Descriptor(_)));
    }

    #[test]
    fn test_descriptor_rejects_unknown_error_types() {
        let abi = r#"[{"type":"error","name":"Bad","inputs":[{"name":"x","type":"uint7"}]}]"#;
        let err = InterfaceDescriptor::from_json(abi).unwrap_err();
        assert!(matches!(err, BindingError::Descriptor(_)));

        let ok = r#"[{"type":"error","name":"Good","inputs":[{"name":"x","type":"uint8"}]}]"#;
        assert!(InterfaceDescriptor::from_json(ok).is_ok());
    }

    #[test]
    fn test_overloaded_event_needs_signature() {
        let abi = r#"[
            {"type":"event","name":"Moved","anonymous":false,"inputs":[{"name":"to","type":"address","indexed":true}]},
            {"type":"event","name":"Moved","anonymous":false,"inputs":[{"name":"to","type":"address","indexed":true},{"name":"amount","type":"uint256","indexed":false}]}
        ]"#;
        let descriptor = InterfaceDescriptor::from_json(abi).unwrap();

        match descriptor.event("Moved") {
            Err(BindingError::Encoding(message)) => {
                assert!(message.contains("Moved(address)"));
                assert!(message.contains("Moved(address,uint256)"));
            }
            other => panic!("expected an overload error, got {:?}", other),
        }

        let event = descriptor.event("Moved(address,uint256)").unwrap();
        assert_eq!(event.inputs.len(), 2);
        assert!(matches!(
            descriptor.event("Stopped"),
            Err(BindingError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_artifact_bytecode_forms() {
        let plain = r#"{"abi":[],"bytecode":"0x6080"}"#;
        let foundry = r#"{"abi":[],"bytecode":{"object":"0x6080"}}"#;
        let empty = r#"{"abi":[],"bytecode":"0x"}"#;

        let expected = Bytes::from(vec![0x60, 0x80]);
        assert_eq!(
            InterfaceDescriptor::from_artifact(plain).unwrap().bytecode(),
            Some(&expected)
        );
        assert_eq!(
            InterfaceDescriptor::from_artifact(foundry)
                .unwrap()
                .bytecode(),
            Some(&expected)
        );
        assert!(InterfaceDescriptor::from_artifact(empty)
            .unwrap()
            .bytecode()
            .is_none());
        assert!(InterfaceDescriptor::from_parts("[]", "0xzz").is_err());
    }

    #[test]
    fn test_encode_call_checks_arity_and_types() {
        let descriptor = InterfaceDescriptor::from_json(RECORDER_ABI).unwrap();

        let err = descriptor
            .encode_call("record", &[DynSolValue::Address(Address::ZERO)])
            .unwrap_err();
        assert!(matches!(err, BindingError::Encoding(_)));

        let err = descriptor
            .encode_call(
                "record",
                &[DynSolValue::Bool(true), DynSolValue::Uint(U256::from(1), 256)],
            )
            .unwrap_err();
        assert!(matches!(err, BindingError::Encoding(_)));

        let err = descriptor.encode_call("missing", &[]).unwrap_err();
        assert!(matches!(err, BindingError::UnknownFunction(_)));

        let (function, data) = descriptor
            .encode_call(
                "record",
                &[
                    DynSolValue::Address(Address::ZERO),
                    DynSolValue::Uint(U256::from(1), 256),
                ],
            )
            .unwrap();
        assert_eq!(&data[..4], function.selector().as_slice());
        assert_eq!(data.len(), 4 + 64);
    }

    #[test]
    fn test_lookup_by_signature() {
        let descriptor = InterfaceDescriptor::from_json(RECORDER_ABI).unwrap();
        assert!(descriptor.function("record(address,uint256)", 2).is_ok());
        assert!(descriptor.event("Created(address,uint256)").is_ok());
        assert!(matches!(
            descriptor.event("Missing"),
            Err(BindingError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_deploy_data() {
        let descriptor = InterfaceDescriptor::from_parts(MESSAGE_BOX_ABI, "0x6080").unwrap();
        assert_eq!(descriptor.deploy_data(&[]).unwrap(), Bytes::from(vec![0x60, 0x80]));
        assert!(matches!(
            descriptor.deploy_data(&[DynSolValue::Bool(true)]),
            Err(BindingError::Encoding(_))
        ));

        let call_only = InterfaceDescriptor::from_json(MESSAGE_BOX_ABI).unwrap();
        assert!(matches!(
            call_only.deploy_data(&[]),
            Err(BindingError::NoDeployCode)
        ));
    }

    #[test]
    fn test_deploy_data_with_constructor() {
        let abi = r#"[{"type":"constructor","inputs":[{"name":"owner","type":"address"}],"stateMutability":"nonpayable"}]"#;
        let descriptor = InterfaceDescriptor::from_parts(abi, "0x00").unwrap();

        let data = descriptor
            .deploy_data(&[DynSolValue::Address(Address::repeat_byte(0x11))])
            .unwrap();
        assert_eq!(data.len(), 1 + 32);
        assert_eq!(data[32], 0x11);

        assert!(matches!(
            descriptor.deploy_data(&[]),
            Err(BindingError::Encoding(_))
        ));
    }

    #[tokio::test]
    async fn test_from_file_detects_format() {
        let temp_dir = tempdir().unwrap();
        let abi_path = temp_dir.path().join("abi.json");
        let artifact_path = temp_dir.path().join("artifact.json");
        fs::write(&abi_path, MESSAGE_BOX_ABI).await.unwrap();
        fs::write(
            &artifact_path,
            format!(r#"{{"abi":{},"bytecode":"0x01"}}"#, MESSAGE_BOX_ABI),
        )
        .await
        .unwrap();

        let plain = InterfaceDescriptor::from_file(&abi_path).await.unwrap();
        assert!(plain.bytecode().is_none());
        let artifact = InterfaceDescriptor::from_file(&artifact_path).await.unwrap();
        assert!(artifact.bytecode().is_some());
    }

    #[tokio::test]
    async fn test_abi_resolver_creation() {
        let temp_dir = tempdir().unwrap();
        let config = AbiSource {
            etherscan_api_key: None,
            cache_dir: temp_dir.path().to_path_buf(),
        };

        let resolver = AbiResolver::new(config);
        assert!(resolver.memory_cache.is_empty());
    }

    #[tokio::test]
    async fn test_manual_abi_addition() {
        let temp_dir = tempdir().unwrap();
        let config = AbiSource {
            etherscan_api_key: None,
            cache_dir: temp_dir.path().to_path_buf(),
        };

        let mut resolver = AbiResolver::new(config);
        let descriptor = Arc::new(InterfaceDescriptor::from_json(MESSAGE_BOX_ABI).unwrap());

        resolver.add_manual("0x123", Some("mainnet"), descriptor.clone());

        assert!(resolver.has_abi("0x123", Some("mainnet")));
        let resolved = resolver.resolve("0x123", Some("mainnet")).await.unwrap();
        assert_eq!(
            resolved.abi().functions().count(),
            descriptor.abi().functions().count()
        );
    }

    #[tokio::test]
    async fn test_disk_cache_round_trip() {
        let temp_dir = tempdir().unwrap();
        let config = AbiSource {
            etherscan_api_key: None,
            cache_dir: temp_dir.path().join("cache"),
        };
        let resolver = AbiResolver::new(config.clone());
        let abi: JsonAbi = serde_json::from_str(MESSAGE_BOX_ABI).unwrap();
        resolver.cache_abi("mainnet_0xabc", &abi).await.unwrap();

        let mut fresh = AbiResolver::new(config);
        assert!(fresh.has_abi("0xABC", None));
        let descriptor = fresh.resolve("0xABC", None).await.unwrap();
        assert!(descriptor.function("message", 0).is_ok());

        fresh.clear_cache().await.unwrap();
        assert!(!fresh.has_abi("0xABC", None));
    }
}
