use alloy::{
    dyn_abi::{DynSolValue, Specifier},
    json_abi::Event,
    primitives::{Address, U256},
};
use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use contract_bind::config::Config;
use contract_bind::ethereum::{
    abi::{AbiResolver, AbiSource, InterfaceDescriptor},
    codec,
    contract::{BoundContract, Capabilities},
    error::BindingError,
    event::DecodedLog,
    provider::ProviderManager,
    utils, CallOptions, FilterOptions, TransactOptions, WatchOptions,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

fn address_arg() -> Arg {
    Arg::new("address")
        .required(true)
        .value_name("ADDRESS")
        .help("Contract address")
}

fn abi_arg() -> Arg {
    Arg::new("abi")
        .long("abi")
        .value_name("FILE")
        .help("ABI or build artifact file. Without it the ABI is fetched from Etherscan")
}

fn args_arg() -> Arg {
    Arg::new("args")
        .short('a')
        .long("args")
        .value_name("JSON")
        .help("Arguments as a JSON array, or an object keyed by parameter name")
}

fn topics_arg() -> Arg {
    Arg::new("topics")
        .long("topics")
        .value_name("JSON")
        .help("One entry per indexed parameter: a value, an array of alternatives, or null")
}

fn value_arg() -> Arg {
    Arg::new("value")
        .long("value")
        .value_name("AMOUNT")
        .help("Value to attach: wei, 0x hex, or a unit such as 0.1ether")
}

fn cli() -> Command {
    Command::new("contract-bind")
        .version("0.1.0")
        .about("Call, transact with, deploy and follow events of Ethereum contracts from their ABI")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("network")
                .short('n')
                .long("network")
                .value_name("NETWORK")
                .global(true)
                .help("Network to use (ethereum, sepolia, local)"),
        )
        .arg(
            Arg::new("rpc-url")
                .short('r')
                .long("rpc-url")
                .value_name("URL")
                .global(true)
                .help("RPC endpoint URL"),
        )
        .arg(
            Arg::new("allow-writes")
                .long("allow-writes")
                .global(true)
                .help("Allow write operations (transactions and deployments)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("call")
                .about("Execute a read-only function")
                .arg(address_arg())
                .arg(Arg::new("function").required(true).value_name("FUNCTION"))
                .arg(abi_arg())
                .arg(args_arg())
                .arg(
                    Arg::new("block")
                        .short('b')
                        .long("block")
                        .value_name("BLOCK")
                        .help("Block number or tag to execute against"),
                )
                .arg(
                    Arg::new("from")
                        .long("from")
                        .value_name("ADDRESS")
                        .help("Caller address"),
                ),
        )
        .subcommand(
            Command::new("send")
                .about("Submit a state-changing transaction, signed with PRIVATE_KEY")
                .arg(address_arg())
                .arg(Arg::new("function").value_name("FUNCTION").help(
                    "Function to invoke. Omit for a plain value transfer",
                ))
                .arg(abi_arg())
                .arg(args_arg())
                .arg(value_arg())
                .arg(
                    Arg::new("gas-limit")
                        .long("gas-limit")
                        .value_name("GAS")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("nonce")
                        .long("nonce")
                        .value_name("NONCE")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("deploy")
                .about("Deploy a contract from a build artifact, signed with PRIVATE_KEY")
                .arg(
                    Arg::new("artifact")
                        .required(true)
                        .value_name("FILE")
                        .help("Artifact with abi and bytecode"),
                )
                .arg(args_arg())
                .arg(value_arg()),
        )
        .subcommand(
            Command::new("logs")
                .about("Query historical events, optionally following new ones")
                .arg(address_arg())
                .arg(Arg::new("event").required(true).value_name("EVENT"))
                .arg(abi_arg())
                .arg(topics_arg())
                .arg(
                    Arg::new("from-block")
                        .long("from-block")
                        .value_name("BLOCK")
                        .default_value("0")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("to-block")
                        .long("to-block")
                        .value_name("BLOCK")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("follow")
                        .short('f')
                        .long("follow")
                        .help("Keep streaming live events after the historical range")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Stream live events until interrupted")
                .arg(address_arg())
                .arg(Arg::new("event").required(true).value_name("EVENT"))
                .arg(abi_arg())
                .arg(topics_arg())
                .arg(
                    Arg::new("from-block")
                        .long("from-block")
                        .value_name("BLOCK")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("encode")
                .about("Print the calldata for a function call")
                .arg(Arg::new("function").required(true).value_name("FUNCTION"))
                .arg(abi_arg().required(true))
                .arg(args_arg()),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = cli().get_matches();

    if matches.get_flag("generate-config") {
        println!("{}", Config::generate_sample());
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e);
            }
        }
    }

    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());
    let mut config = Config::load_or_default(config_path).await;

    if let Some(network) = matches.get_one::<String>("network") {
        let available: Vec<String> = config.networks.keys().cloned().collect();
        utils::validate_network(network, &available)?;
        config.default_network = network.clone();
    }

    if let Some(rpc_url) = matches.get_one::<String>("rpc-url") {
        if let Some(network_config) = config.networks.get_mut(&config.default_network) {
            network_config.rpc_url = rpc_url.clone();
        }
    }

    if matches.get_flag("allow-writes") {
        config.security.allow_write_operations = true;
    }

    info!("Network: {}", config.default_network);

    let app = App::new(config)?;
    let output = match matches.subcommand() {
        Some(("call", sub)) => app.call(sub).await?,
        Some(("send", sub)) => app.send(sub).await?,
        Some(("deploy", sub)) => app.deploy(sub).await?,
        Some(("logs", sub)) => app.logs(sub).await?,
        Some(("watch", sub)) => app.watch(sub).await?,
        Some(("encode", sub)) => app.encode(sub).await?,
        _ => {
            cli().print_help()?;
            return Ok(());
        }
    };

    if !output.is_null() {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

fn friendly(err: BindingError) -> anyhow::Error {
    anyhow!(utils::describe_error(&err))
}

fn parse_json_arg(matches: &ArgMatches, name: &str) -> Result<Value> {
    match matches.get_one::<String>(name) {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| anyhow!("--{} is not valid JSON: {}", name, e)),
        None => Ok(Value::Null),
    }
}

fn arg_count(args: &Value) -> usize {
    match args {
        Value::Array(items) => items.len(),
        Value::Object(fields) => fields.len(),
        Value::Null => 0,
        _ => 1,
    }
}

fn parse_value_arg(matches: &ArgMatches) -> Result<U256> {
    matches
        .get_one::<String>("value")
        .map(|v| utils::parse_value(v))
        .transpose()
        .map(Option::unwrap_or_default)
}

/// Resolve the arguments of `name` from JSON against its declared inputs.
fn function_args(
    descriptor: &InterfaceDescriptor,
    name: &str,
    args: &Value,
) -> Result<Vec<DynSolValue>> {
    let function = descriptor
        .function(name, arg_count(args))
        .map_err(friendly)?;
    codec::json_args(name, &function.inputs, args).map_err(friendly)
}

/// Topic sets for the indexed parameters of `event`, from a JSON array.
fn topic_sets(event: &Event, topics: &Value) -> Result<Vec<Vec<DynSolValue>>> {
    let entries = match topics {
        Value::Null => return Ok(vec![]),
        Value::Array(entries) => entries,
        _ => return Err(anyhow!("--topics must be a JSON array")),
    };

    let indexed: Vec<_> = event.inputs.iter().filter(|p| p.indexed).collect();
    if entries.len() > indexed.len() {
        return Err(anyhow!(
            "Event '{}' has {} indexed parameters, got {} topic entries",
            event.name,
            indexed.len(),
            entries.len()
        ));
    }

    entries
        .iter()
        .zip(indexed)
        .map(|(entry, param)| -> Result<Vec<DynSolValue>> {
            let ty = param
                .resolve()
                .map_err(|e| anyhow!("Unsupported type for '{}': {}", param.name, e))?;
            let candidates = match entry {
                Value::Null => vec![],
                Value::Array(items) => items.iter().collect(),
                single => vec![single],
            };
            candidates
                .into_iter()
                .map(|value| {
                    codec::json_to_value(value, &ty)
                        .map_err(|e| anyhow!("Invalid topic for '{}': {}", param.name, e))
                })
                .collect()
        })
        .collect()
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, closing event stream");
            token.cancel();
        }
    });
}

struct App {
    config: Config,
    providers: ProviderManager,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let providers = ProviderManager::new(config.clone())?;
        Ok(Self { config, providers })
    }

    fn network(&self) -> &str {
        &self.config.default_network
    }

    async fn descriptor(
        &self,
        matches: &ArgMatches,
        address: &str,
    ) -> Result<Arc<InterfaceDescriptor>> {
        match matches.get_one::<String>("abi") {
            Some(path) => Ok(Arc::new(
                InterfaceDescriptor::from_file(path).await.map_err(friendly)?,
            )),
            None => {
                let mut resolver = AbiResolver::new(AbiSource::default());
                resolver
                    .resolve(address, Some(self.network()))
                    .await
                    .map_err(|e| {
                        anyhow!(utils::interpret_abi_error(&e.to_string(), address))
                    })
            }
        }
    }

    fn signer(&self, value: U256) -> Result<(Address, Capabilities)> {
        self.config.security.check_write(value)?;
        let key = std::env::var("PRIVATE_KEY")
            .map_err(|_| anyhow!("PRIVATE_KEY must be set for send and deploy"))?;
        self.providers.with_signer(None, &key)
    }

    async fn bind_read_only(&self, matches: &ArgMatches) -> Result<BoundContract> {
        let address = required(matches, "address")?;
        let parsed = utils::validate_address(address)?;
        let descriptor = self.descriptor(matches, address).await?;
        self.providers.validate_network_connection(None).await?;
        Ok(
            BoundContract::bind(parsed, descriptor, self.providers.read_only(None)?)
                .map_err(friendly)?
                .with_log_buffer(self.config.events.log_buffer),
        )
    }

    async fn call(&self, matches: &ArgMatches) -> Result<Value> {
        let contract = self.bind_read_only(matches).await?;
        let function = required(matches, "function")?;
        utils::validate_member_name(function)?;

        let args = function_args(contract.descriptor(), function, &parse_json_arg(matches, "args")?)?;

        let mut opts = CallOptions::default();
        if let Some(block) = matches.get_one::<String>("block") {
            opts.block = Some(utils::parse_block_id(block)?);
        }
        if let Some(from) = matches.get_one::<String>("from") {
            opts.from = Some(utils::validate_address(from)?);
        }

        let output = contract.call(function, &args, &opts).await.map_err(friendly)?;
        Ok(json!({
            "contract": contract.address().to_checksum(None),
            "function": function,
            "result": output.to_json(),
        }))
    }

    async fn send(&self, matches: &ArgMatches) -> Result<Value> {
        let address = required(matches, "address")?;
        let parsed = utils::validate_address(address)?;
        let value = parse_value_arg(matches)?;
        let (from, caps) = self.signer(value)?;

        let mut opts = TransactOptions::new(from).with_value(value);
        if let Some(gas_limit) = matches.get_one::<u64>("gas-limit") {
            opts = opts.with_gas_limit(*gas_limit);
        }
        if let Some(nonce) = matches.get_one::<u64>("nonce") {
            opts = opts.with_nonce(*nonce);
        }

        let pending = match matches.get_one::<String>("function") {
            Some(function) => {
                utils::validate_member_name(function)?;
                let descriptor = self.descriptor(matches, address).await?;
                let args = function_args(&descriptor, function, &parse_json_arg(matches, "args")?)?;
                let contract = BoundContract::bind(parsed, descriptor, caps).map_err(friendly)?;
                contract.transact(function, &args, &opts).await
            }
            None => {
                let descriptor = Arc::new(InterfaceDescriptor::from_json("[]").map_err(friendly)?);
                let contract = BoundContract::bind(parsed, descriptor, caps).map_err(friendly)?;
                contract.transfer(&opts).await
            }
        }
        .map_err(friendly)?;

        info!("Submitted transaction {}", pending.hash);
        Ok(serde_json::to_value(pending)?)
    }

    async fn deploy(&self, matches: &ArgMatches) -> Result<Value> {
        let descriptor = Arc::new(
            InterfaceDescriptor::from_file(required(matches, "artifact")?)
                .await
                .map_err(friendly)?,
        );

        let args = parse_json_arg(matches, "args")?;
        let args = match descriptor.abi().constructor() {
            Some(constructor) => {
                codec::json_args("constructor", &constructor.inputs, &args).map_err(friendly)?
            }
            None => codec::json_args("constructor", &[], &args).map_err(friendly)?,
        };

        let value = parse_value_arg(matches)?;
        let (from, caps) = self.signer(value)?;
        let opts = TransactOptions::new(from).with_value(value);

        let (address, pending, _) = BoundContract::deploy(descriptor, caps, &opts, &args)
            .await
            .map_err(friendly)?;

        info!("Deployment submitted in {}", pending.hash);
        Ok(json!({
            "address": address.to_checksum(None),
            "transaction": pending,
        }))
    }

    async fn logs(&self, matches: &ArgMatches) -> Result<Value> {
        let contract = self.bind_read_only(matches).await?;
        let event = required(matches, "event")?;
        utils::validate_member_name(event)?;
        let topics = topic_sets(
            contract.descriptor().event(event).map_err(friendly)?,
            &parse_json_arg(matches, "topics")?,
        )?;

        let start = matches.get_one::<u64>("from-block").copied().unwrap_or(0);
        let end = matches.get_one::<u64>("to-block").copied();
        utils::validate_block_range(start, end)?;
        let opts = FilterOptions {
            start,
            end,
            follow: matches.get_flag("follow"),
        };

        let mut events = contract
            .filter::<DecodedLog>(event, &opts, &topics)
            .await
            .map_err(friendly)?;
        cancel_on_interrupt(events.closer());

        let mut count = 0usize;
        while events.next().await {
            if let Some(log) = events.take() {
                println!("{}", serde_json::to_string(&log.to_json())?);
                count += 1;
            }
        }

        if let Some(err) = events.error() {
            return Err(anyhow!(utils::describe_error(err)));
        }

        info!("{} events delivered", count);
        Ok(Value::Null)
    }

    async fn watch(&self, matches: &ArgMatches) -> Result<Value> {
        let contract = self.bind_read_only(matches).await?;
        let event = required(matches, "event")?;
        utils::validate_member_name(event)?;
        let topics = topic_sets(
            contract.descriptor().event(event).map_err(friendly)?,
            &parse_json_arg(matches, "topics")?,
        )?;

        let opts = WatchOptions {
            start: matches.get_one::<u64>("from-block").copied(),
        };
        let (sink, mut received) = mpsc::channel(self.config.events.log_buffer.max(1));

        let mut watch = contract
            .watch::<DecodedLog>(event, &opts, &topics, sink)
            .await
            .map_err(friendly)?;
        cancel_on_interrupt(watch.closer());

        while let Some(log) = received.recv().await {
            println!("{}", serde_json::to_string(&log.to_json())?);
        }

        watch.done().await.map_err(friendly)?;
        Ok(Value::Null)
    }

    async fn encode(&self, matches: &ArgMatches) -> Result<Value> {
        let descriptor = InterfaceDescriptor::from_file(required(matches, "abi")?)
            .await
            .map_err(friendly)?;
        let function = required(matches, "function")?;
        utils::validate_member_name(function)?;

        let args = function_args(&descriptor, function, &parse_json_arg(matches, "args")?)?;
        let (resolved, data) = descriptor.encode_call(function, &args).map_err(friendly)?;

        Ok(json!({
            "signature": resolved.signature(),
            "selector": resolved.selector().to_string(),
            "data": format!("0x{}", hex::encode(&data)),
        }))
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(|s| s.as_str())
        .ok_or_else(|| anyhow!("Missing required argument '{}'", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::keccak256;

    const EVENT_ABI: &str = r#"[{
        "type": "event",
        "name": "SecretCreated",
        "anonymous": false,
        "inputs": [
            {"name": "creator", "type": "address", "indexed": true},
            {"name": "name", "type": "string", "indexed": true},
            {"name": "index", "type": "uint256", "indexed": false}
        ]
    }]"#;

    #[test]
    fn test_cli_parses_subcommands() {
        cli().debug_assert();

        let matches = cli()
            .try_get_matches_from([
                "contract-bind",
                "--network",
                "local",
                "logs",
                "0x5FbDB2315678afecb367f032d93F642f64180aa3",
                "SecretCreated",
                "--from-block",
                "10",
                "--follow",
            ])
            .unwrap();
        assert_eq!(matches.get_one::<String>("network").unwrap(), "local");

        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "logs");
        assert_eq!(sub.get_one::<u64>("from-block"), Some(&10));
        assert!(sub.get_flag("follow"));
    }

    #[test]
    fn test_arg_count() {
        assert_eq!(arg_count(&Value::Null), 0);
        assert_eq!(arg_count(&json!(["a", 1])), 2);
        assert_eq!(arg_count(&json!({"message": "hi"})), 1);
    }

    #[test]
    fn test_topic_sets() {
        let descriptor = InterfaceDescriptor::from_json(EVENT_ABI).unwrap();
        let event = descriptor.event("SecretCreated").unwrap();
        let creator = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

        let sets = topic_sets(event, &json!([[creator], "will"])).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0], vec![DynSolValue::Address(creator.parse().unwrap())]);
        assert_eq!(sets[1], vec![DynSolValue::String("will".into())]);

        let wildcard = topic_sets(event, &json!([null, ["a", "b"]])).unwrap();
        assert!(wildcard[0].is_empty());
        assert_eq!(wildcard[1].len(), 2);

        assert!(topic_sets(event, &json!([null, null, null])).is_err());
        assert!(topic_sets(event, &json!({"creator": creator})).is_err());
        assert!(topic_sets(event, &Value::Null).unwrap().is_empty());

        let filter =
            contract_bind::ethereum::event::topic_filter(event, &sets).unwrap();
        assert_eq!(filter[2], vec![keccak256("will")]);
    }
}
