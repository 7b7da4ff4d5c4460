//! Stand-in for every external collaborator of a localnet run.
//!
//! `localnet-stub <role> [flags...]` accepts the same command line as the
//! real executable for that role and behaves just enough like it for the
//! orchestrator: it listens where it is told to, prints the lines the
//! readiness watchers look for, and exits on SIGINT. Point a config at it
//! with `Binaries::all_from("localnet-stub")`.

use anyhow::{Context, Result, bail};
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use clap::{Parser, ValueEnum};
use localnet_common::{
    ClusterStartupResult, ClusterStartupSuccess, FailureReason, PrivateKey, StartClusterRequest,
    StopClusterResponse,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Emulator control service that starts clusters.
    Emulator,
    /// Emulator that rejects every start request.
    EmulatorReject,
    /// Emulator that answers with undecodable keys.
    EmulatorBadKeys,
    Database,
    Initdb,
    Psql,
    Createdb,
    QueryNode,
    Indexer,
    AppServer,
    /// Prints one line and exits with status 1.
    ExitEarly,
}

#[derive(Parser)]
#[command(name = "localnet-stub", disable_help_flag = true, disable_version_flag = true)]
struct StubCli {
    #[arg(value_enum)]
    role: Role,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    rest: Vec<String>,
}

/// `-x value`, `--name value`, `--name=value` and bare positionals.
#[derive(Debug, Default)]
struct Flags {
    values: HashMap<String, String>,
    positional: Vec<String>,
}

impl Flags {
    fn parse(args: &[String]) -> Self {
        let mut flags = Flags::default();
        let mut iter = args.iter().peekable();
        while let Some(arg) = iter.next() {
            if !arg.starts_with('-') {
                flags.positional.push(arg.clone());
                continue;
            }
            let name = arg.trim_start_matches('-');
            if let Some((name, value)) = name.split_once('=') {
                flags.values.insert(name.to_string(), value.to_string());
            } else if let Some(value) = iter.next_if(|next| !next.starts_with('-')) {
                flags.values.insert(name.to_string(), value.clone());
            } else {
                flags.values.insert(name.to_string(), String::new());
            }
        }
        flags
    }

    fn get(&self, name: &str) -> Result<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .with_context(|| format!("missing -{name}"))
    }

    fn port(&self, name: &str) -> Result<u16> {
        self.get(name)?
            .parse()
            .with_context(|| format!("-{name} is not a port"))
    }

    fn host_or_loopback(&self, name: &str) -> String {
        self.values
            .get(name)
            .cloned()
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = StubCli::parse();
    let flags = Flags::parse(&cli.rest);

    match cli.role {
        Role::Emulator => emulator(&flags, EmulatorMode::Normal).await,
        Role::EmulatorReject => emulator(&flags, EmulatorMode::Reject).await,
        Role::EmulatorBadKeys => emulator(&flags, EmulatorMode::BadKeys).await,
        Role::Database => database(&flags).await,
        Role::Initdb => initdb(&flags),
        Role::Psql | Role::Createdb => client(&flags).await,
        Role::QueryNode => query_node(&flags).await,
        Role::Indexer => indexer(&flags).await,
        Role::AppServer => app_server(&flags).await,
        Role::ExitEarly => {
            println!("starting up");
            eprintln!("fatal: cannot reach dependency");
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn serve(host: &str, port: u16, app: Router, banner: &str) -> Result<()> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("bind {host}:{port}"))?;
    println!("{banner} on {host}:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")
}

async fn reachable(host: &str, port: u16) -> bool {
    TcpStream::connect((host, port)).await.is_ok()
}

// --- emulator ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmulatorMode {
    Normal,
    Reject,
    BadKeys,
}

#[derive(Clone)]
struct EmulatorState {
    mode: EmulatorMode,
    running: Arc<Mutex<bool>>,
}

async fn emulator(flags: &Flags, mode: EmulatorMode) -> Result<()> {
    let port = flags.port("p")?;
    let state = EmulatorState {
        mode,
        running: Arc::new(Mutex::new(false)),
    };
    let app = Router::new()
        .route("/start", post(start_cluster))
        .route("/stop", post(stop_cluster))
        .with_state(state);
    serve("127.0.0.1", port, app, "emulator control listening").await
}

async fn start_cluster(
    State(state): State<EmulatorState>,
    Json(request): Json<StartClusterRequest>,
) -> Json<ClusterStartupResult> {
    if state.mode == EmulatorMode::Reject
        || request.keys_to_generate.iter().flatten().any(|amount| *amount == 0)
    {
        return Json(ClusterStartupResult::ClusterStartupFailure(FailureReason(
            json!("NegativeLovelaces"),
        )));
    }

    let private_keys = (0..request.keys_to_generate.len())
        .map(|index| match state.mode {
            EmulatorMode::BadKeys => "not-hex".to_string(),
            _ => PrivateKey::from_bytes([index as u8 + 1; 32]).to_cbor_hex(),
        })
        .collect();
    if let Ok(mut running) = state.running.lock() {
        *running = true;
    }

    let dir = std::env::temp_dir().join("localnet-stub-cluster");
    Json(ClusterStartupResult::ClusterStartupSuccess(ClusterStartupSuccess {
        private_keys,
        node_socket_path: dir.join("node.socket").display().to_string(),
        node_config_path: dir.join("node.config").display().to_string(),
        keys_directory: dir.join("keys").display().to_string(),
    }))
}

async fn stop_cluster(State(state): State<EmulatorState>) -> Json<StopClusterResponse> {
    let was_running = state
        .running
        .lock()
        .map(|mut running| std::mem::replace(&mut *running, false))
        .unwrap_or(false);
    if was_running {
        Json(StopClusterResponse::StopClusterSuccess)
    } else {
        Json(StopClusterResponse::StopClusterFailure(FailureReason(
            json!("NotStarted"),
        )))
    }
}

// --- database and its clients ---

fn initdb(flags: &Flags) -> Result<()> {
    let data = PathBuf::from(flags.get("D")?);
    if data.join("PG_VERSION").exists() {
        bail!("initdb: directory {} exists but is not empty", data.display());
    }
    std::fs::create_dir_all(&data)?;
    std::fs::write(data.join("PG_VERSION"), "16\n")?;
    println!("Success. You can now start the database server.");
    Ok(())
}

async fn database(flags: &Flags) -> Result<()> {
    let data = PathBuf::from(flags.get("D")?);
    if !data.join("PG_VERSION").exists() {
        bail!("FATAL: {} is not a database cluster directory", data.display());
    }
    let host = flags.host_or_loopback("h");
    let port = flags.port("p")?;
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("could not bind {host}:{port}"))?;
    println!("database system is ready to accept connections");

    let accept = async {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => drop(socket),
                Err(err) => {
                    eprintln!("accept failed: {err}");
                    break;
                }
            }
        }
    };
    tokio::select! {
        _ = accept => {}
        _ = shutdown_signal() => println!("received fast shutdown request"),
    }
    Ok(())
}

async fn client(flags: &Flags) -> Result<()> {
    let port = flags.port("p")?;
    if reachable("127.0.0.1", port).await {
        Ok(())
    } else {
        eprintln!("error: connection to server on port {port} failed: Connection refused");
        std::process::exit(2);
    }
}

// --- websocket services ---

type Handler = fn(&str, &Value) -> Result<Value, Value>;

async fn jsonwsp_socket(mut socket: WebSocket, servicename: &'static str, handler: Handler) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let method = request["methodname"].as_str().unwrap_or_default();
        let mut response = json!({
            "type": "jsonwsp/response",
            "version": "1.0",
            "servicename": servicename,
            "methodname": method,
            "reflection": request["mirror"],
        });
        match handler(method, &request["args"]) {
            Ok(result) => response["result"] = result,
            Err(fault) => response["fault"] = fault,
        }
        if socket
            .send(Message::Text(response.to_string().into()))
            .await
            .is_err()
        {
            break;
        }
    }
}

fn jsonwsp_router(servicename: &'static str, handler: Handler) -> Router {
    Router::new().route(
        "/",
        any(move |ws: WebSocketUpgrade| async move {
            ws.on_upgrade(move |socket| jsonwsp_socket(socket, servicename, handler))
        }),
    )
}

fn query_node_methods(method: &str, args: &Value) -> Result<Value, Value> {
    match (method, args["query"].as_str()) {
        ("Query", Some("currentProtocolParameters")) => Ok(json!({
            "minFeeCoefficient": 44,
            "minFeeConstant": 155381,
            "maxTxSize": 16384,
            "maxValueSize": 5000,
            "coinsPerUtxoByte": 4310,
            "protocolVersion": { "major": 8, "minor": 0 }
        })),
        ("Query", Some("chainTip")) => Ok(json!({ "slot": 0, "hash": "00" })),
        _ => Err(json!({ "code": "client", "string": format!("unsupported: {method}") })),
    }
}

fn indexer_methods(method: &str, args: &Value) -> Result<Value, Value> {
    match method {
        "GetDatumsByHashes" => {
            let hashes = args["hashes"].as_array().cloned().unwrap_or_default();
            Ok(json!({ "DatumsByHashes": hashes.iter().map(|h| json!({"hash": h, "value": null})).collect::<Vec<_>>() }))
        }
        "GetHealthcheck" => Ok(json!("ok")),
        _ => Err(json!({ "code": "client", "string": format!("unsupported: {method}") })),
    }
}

async fn query_node(flags: &Flags) -> Result<()> {
    let host = flags.host_or_loopback("host");
    let port = flags.port("port")?;
    let socket = flags.get("node-socket")?;
    let banner = format!("query node for {socket} listening");
    serve(
        &host,
        port,
        jsonwsp_router("ogmios", query_node_methods),
        &banner,
    )
    .await
}

async fn indexer(flags: &Flags) -> Result<()> {
    let port = flags.port("server-port")?;
    let ogmios_host = flags.host_or_loopback("ogmios-address");
    let ogmios_port = flags.port("ogmios-port")?;
    let db_host = flags.host_or_loopback("db-host");
    let db_port = flags.port("db-port")?;

    if !reachable(&db_host, db_port).await {
        bail!("could not connect to database at {db_host}:{db_port}");
    }
    if !reachable(&ogmios_host, ogmios_port).await {
        bail!("could not connect to query node at {ogmios_host}:{ogmios_port}");
    }

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("bind 127.0.0.1:{port}"))?;
    println!("Starting indexer on port {port}");
    println!("Intersection found at origin");
    axum::serve(listener, jsonwsp_router("ogmios-datum-cache", indexer_methods))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")
}

async fn app_server(flags: &Flags) -> Result<()> {
    let port = flags.port("port")?;
    let ogmios_host = flags.host_or_loopback("ogmios-host");
    let ogmios_port = flags.port("ogmios-port")?;
    if !reachable(&ogmios_host, ogmios_port).await {
        bail!("could not connect to Ogmios at {ogmios_host}:{ogmios_port}");
    }

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("bind 127.0.0.1:{port}"))?;
    println!("Successfully connected to Ogmios");
    let app = Router::new().route("/health", get(|| async { "ok" }));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")
}
