// Relay Server CLI Validation Tool
// Drives the relay port and the status responder through automated scenarios and interactive sessions

use clap::{Parser, Subcommand};
use colored::*;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Rendezvous Relay CLI Validation Tool", long_about = None)]
struct Cli {
    /// Relay address (default: 127.0.0.1:5899)
    #[arg(short, long, default_value = "127.0.0.1:5899")]
    server: String,

    /// Status responder address (default: 127.0.0.1:10000)
    #[arg(long, default_value = "127.0.0.1:10000")]
    status: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the status endpoint
    Health,

    /// Open a room as host and bridge stdin/stdout once a viewer joins
    Host {
        /// Room password (optional)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Join a room as viewer and bridge stdin/stdout to the host
    View {
        /// Room code announced to the host
        #[arg(short, long)]
        code: String,

        /// Room password (optional)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(long)]
        scenario: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.status).await;
        }
        Commands::Host { password } => {
            host_room(&cli.server, password.as_deref()).await;
            // tokio's stdin reader can keep the runtime alive after the relay ends
            std::process::exit(0);
        }
        Commands::View { code, password } => {
            view_room(&cli.server, code, password.as_deref()).await;
            std::process::exit(0);
        }
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server, &cli.status).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, &cli.status, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
    }
}

async fn check_health(status: &str) {
    println!("{}", "Checking relay status...".cyan());

    let url = format!("http://{}/status", status);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let code = resp.status();
            if code.is_success() {
                println!("{} Status check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Active rooms: {}", body["active_rooms"]);
                }
            } else {
                println!("{} Status check failed: {}", "✗".red(), code);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to status responder: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", status);
        }
    }
}

async fn host_room(server: &str, password: Option<&str>) {
    println!("{}", "Opening room...".cyan());

    let hello = json!({ "role": "host", "password": password });
    let (stream, reply, rest) = match handshake(server, hello).await {
        Ok(session) => session,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };

    let Some(code) = accepted_code(&reply) else {
        println!("{} Room was not created: {}", "✗".red(), reply);
        return;
    };

    println!("{} Room created successfully!", "✓".green());
    println!("\n{}", "═".repeat(50).green());
    println!("{} {}", "Room code:".bold(), code.green().bold());
    println!("{}", "═".repeat(50).green());
    println!("Waiting for a viewer. Press {} to close the room.", "Ctrl+C".bold());

    bridge(stream, rest).await;
}

async fn view_room(server: &str, code: &str, password: Option<&str>) {
    println!("{}", "Joining room...".cyan());
    println!("  Room code: {}", code);

    let hello = json!({ "role": "viewer", "room_code": code, "password": password });
    let (stream, reply, rest) = match handshake(server, hello).await {
        Ok(session) => session,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };

    if accepted_code(&reply).is_none() {
        println!("{} Error: {}", "✗".red(), reply["message"].as_str().unwrap_or("unknown"));
        return;
    }

    println!("{} Connected to host", "✓".green());
    bridge(stream, rest).await;
}

/// Copy stdin to the relay and relay output to stdout until either side ends
async fn bridge(stream: TcpStream, rest: Vec<u8>) {
    let mut stdout = tokio::io::stdout();
    if !rest.is_empty() && stdout.write_all(&rest).await.is_err() {
        return;
    }

    let (mut reader, mut writer) = stream.into_split();
    let mut stdin = tokio::io::stdin();

    let download = tokio::io::copy(&mut reader, &mut stdout);
    let upload = async {
        let copied = tokio::io::copy(&mut stdin, &mut writer).await;
        let _ = writer.shutdown().await;
        copied
    };
    tokio::pin!(download);

    let received = tokio::select! {
        received = &mut download => received,
        _ = upload => download.await,
    };

    match received {
        Ok(bytes) => println!("\n{} Relay closed ({} bytes received)", "✓".yellow(), bytes),
        Err(e) => println!("\n{} Relay error: {}", "✗".red(), e),
    }
}

/// Connect, send the handshake and read the server's reply.
///
/// Returns the open stream, the reply object and any relayed bytes that
/// arrived in the same reads as the reply.
async fn handshake(server: &str, hello: Value) -> Result<(TcpStream, Value, Vec<u8>), String> {
    let mut stream = TcpStream::connect(server)
        .await
        .map_err(|e| format!("Cannot connect to relay: {}", e))?;

    stream
        .write_all(hello.to_string().as_bytes())
        .await
        .map_err(|e| format!("Failed to send handshake: {}", e))?;

    let (reply, rest) = match timeout(REPLY_TIMEOUT, read_reply(&mut stream)).await {
        Ok(result) => result?,
        Err(_) => return Err("Timeout waiting for reply".to_string()),
    };

    Ok((stream, reply, rest))
}

async fn read_reply(stream: &mut TcpStream) -> Result<(Value, Vec<u8>), String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        {
            let mut values = serde_json::Deserializer::from_slice(&buf).into_iter::<Value>();
            match values.next() {
                Some(Ok(reply)) => {
                    let consumed = values.byte_offset();
                    return Ok((reply, buf[consumed..].to_vec()));
                }
                Some(Err(e)) if !e.is_eof() => return Err(format!("Invalid reply: {}", e)),
                _ => {}
            }
        }

        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| format!("Error receiving reply: {}", e))?;
        if n == 0 {
            return Err("Connection closed by server".to_string());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn accepted_code(reply: &Value) -> Option<String> {
    if reply["status"] == "ok" {
        reply["room_code"].as_str().map(str::to_string)
    } else {
        None
    }
}

/// Read until `expected` bytes have arrived, starting from bytes already buffered
async fn read_relayed(stream: &mut TcpStream, mut buf: Vec<u8>, expected: usize) -> Option<Vec<u8>> {
    let mut chunk = [0u8; 1024];
    while buf.len() < expected {
        match timeout(REPLY_TIMEOUT, stream.read(&mut chunk)).await {
            Ok(Ok(n)) if n > 0 => buf.extend_from_slice(&chunk[..n]),
            _ => return None,
        }
    }
    Some(buf)
}

/// Open a room and print the outcome. Returns the host stream and code.
async fn open_room(server: &str, password: Option<&str>) -> Option<(TcpStream, String)> {
    match handshake(server, json!({ "role": "host", "password": password })).await {
        Ok((stream, reply, _)) => match accepted_code(&reply) {
            Some(code) => {
                println!("{} Room created: {}", "✓".green(), code.green());
                Some((stream, code))
            }
            None => {
                println!("{} Unexpected reply: {}", "✗".red(), reply);
                None
            }
        },
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            None
        }
    }
}

/// Expect a viewer to be turned away with `message`
async fn expect_rejection(server: &str, hello: Value, message: &str) -> bool {
    match handshake(server, hello).await {
        Ok((_, reply, _)) if reply["status"] == "error" && reply["message"] == message => {
            println!("{} Rejected with '{}'", "✓".green(), message);
            true
        }
        Ok((_, reply, _)) => {
            println!("{} Expected '{}', got {}", "✗".red(), message, reply);
            false
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            false
        }
    }
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("\n{}", "Status:".bold().cyan());
    println!("  {} - Status endpoint reports the service online", "status".cyan());
    println!("\n{}", "Relay:".bold().cyan());
    println!("  {} - Host receives a room code", "create-room".cyan());
    println!("  {} - Viewer joins a password protected room", "join-room".cyan());
    println!("  {} - Bytes flow in both directions", "echo".cyan());
    println!("  {} - Wrong password is rejected", "wrong-password".cyan());
    println!("  {} - Unknown room code is rejected", "invalid-room".cyan());
    println!("  {} - Second viewer is turned away", "occupied-room".cyan());
    println!("  {} - Concurrent viewers, exactly one admitted", "viewer-race".cyan());
    println!("\nExample: relay-cli validate --scenario echo");
    println!("Example: relay-cli --server relay.example.com:5899 validate --all");
}

const SCENARIOS: &[&str] = &[
    "status",
    "create-room",
    "join-room",
    "echo",
    "wrong-password",
    "invalid-room",
    "occupied-room",
    "viewer-race",
];

async fn dispatch(server: &str, status: &str, scenario: &str) -> Option<bool> {
    let result = match scenario {
        "status" => validate_status(status).await,
        "create-room" => validate_create_room(server).await,
        "join-room" => validate_join_room(server).await,
        "echo" => validate_echo(server).await,
        "wrong-password" => validate_wrong_password(server).await,
        "invalid-room" => validate_invalid_room(server).await,
        "occupied-room" => validate_occupied_room(server).await,
        "viewer-race" => validate_viewer_race(server).await,
        _ => return None,
    };
    Some(result)
}

async fn run_scenario(server: &str, status: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    match dispatch(server, status, scenario).await {
        Some(true) => println!("\n{} Scenario passed", "✓".green().bold()),
        Some(false) => println!("\n{} Scenario failed", "✗".red().bold()),
        None => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
        }
    }
}

async fn run_all_validations(server: &str, status: &str) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let mut passed = 0;
    let mut failed = 0;

    for scenario in SCENARIOS {
        println!("\n{} Testing: {}", "▶".cyan(), scenario.bold());
        println!("{}", "─".repeat(60));

        if dispatch(server, status, scenario).await == Some(true) {
            passed += 1;
        } else {
            failed += 1;
        }

        sleep(Duration::from_millis(200)).await;
    }

    println!("\n{}", "═".repeat(60).green());
    println!("{}", "Validation Summary".bold());
    println!("{}", "═".repeat(60).green());
    println!("  {} {}", "Passed:".green(), passed);
    println!("  {} {}", "Failed:".red(), failed);

    if failed == 0 {
        println!("\n{}", "All validations passed!".green().bold());
    } else {
        println!("\n{}", "Some validations failed".red().bold());
    }
}

async fn validate_status(status: &str) -> bool {
    let url = format!("http://{}/status", status);

    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
            Ok(body) if body["status"] == "online" => {
                println!("{} Service online, {} active rooms", "✓".green(), body["active_rooms"]);
                true
            }
            Ok(body) => {
                println!("{} Unexpected body: {}", "✗".red(), body);
                false
            }
            Err(e) => {
                println!("{} Invalid JSON: {}", "✗".red(), e);
                false
            }
        },
        Ok(resp) => {
            println!("{} Status endpoint returned {}", "✗".red(), resp.status());
            false
        }
        Err(e) => {
            println!("{} Cannot connect: {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_create_room(server: &str) -> bool {
    let Some((_host, code)) = open_room(server, None).await else {
        return false;
    };

    let well_formed = code.len() == 8
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if !well_formed {
        println!("{} Malformed room code: {}", "✗".red(), code);
    }
    well_formed
}

async fn validate_join_room(server: &str) -> bool {
    let Some((_host, code)) = open_room(server, Some("cli-secret")).await else {
        return false;
    };

    // Codes are matched case-insensitively
    let hello = json!({
        "role": "viewer",
        "room_code": code.to_lowercase(),
        "password": "cli-secret",
    });

    match handshake(server, hello).await {
        Ok((_viewer, reply, _)) if accepted_code(&reply).as_deref() == Some(code.as_str()) => {
            println!("{} Viewer joined {}", "✓".green(), code);
            true
        }
        Ok((_, reply, _)) => {
            println!("{} Unexpected reply: {}", "✗".red(), reply);
            false
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_echo(server: &str) -> bool {
    let Some((mut host, code)) = open_room(server, None).await else {
        return false;
    };

    let (mut viewer, rest) =
        match handshake(server, json!({ "role": "viewer", "room_code": code })).await {
            Ok((stream, reply, rest)) if accepted_code(&reply).is_some() => (stream, rest),
            Ok((_, reply, _)) => {
                println!("{} Viewer rejected: {}", "✗".red(), reply);
                return false;
            }
            Err(e) => {
                println!("{} {}", "✗".red(), e);
                return false;
            }
        };

    if host.write_all(b"ping").await.is_err() {
        println!("{} Host write failed", "✗".red());
        return false;
    }
    match read_relayed(&mut viewer, rest, 4).await {
        Some(bytes) if bytes == b"ping" => println!("{} host -> viewer", "✓".green()),
        other => {
            println!("{} Viewer received {:?}", "✗".red(), other);
            return false;
        }
    }

    if viewer.write_all(b"pong").await.is_err() {
        println!("{} Viewer write failed", "✗".red());
        return false;
    }
    match read_relayed(&mut host, Vec::new(), 4).await {
        Some(bytes) if bytes == b"pong" => {
            println!("{} viewer -> host", "✓".green());
            true
        }
        other => {
            println!("{} Host received {:?}", "✗".red(), other);
            false
        }
    }
}

async fn validate_wrong_password(server: &str) -> bool {
    let Some((_host, code)) = open_room(server, Some("right")).await else {
        return false;
    };

    let hello = json!({ "role": "viewer", "room_code": code, "password": "wrong" });
    expect_rejection(server, hello, "Wrong password").await
}

async fn validate_invalid_room(server: &str) -> bool {
    let hello = json!({ "role": "viewer", "room_code": "ZZZZZZZZ" });
    expect_rejection(server, hello, "Room not found").await
}

async fn validate_occupied_room(server: &str) -> bool {
    let Some((_host, code)) = open_room(server, None).await else {
        return false;
    };

    let first = handshake(server, json!({ "role": "viewer", "room_code": code })).await;
    let _first = match first {
        Ok((stream, reply, _)) if accepted_code(&reply).is_some() => {
            println!("{} First viewer admitted", "✓".green());
            stream
        }
        _ => {
            println!("{} First viewer was not admitted", "✗".red());
            return false;
        }
    };

    let hello = json!({ "role": "viewer", "room_code": code });
    expect_rejection(server, hello, "Room is occupied").await
}

async fn validate_viewer_race(server: &str) -> bool {
    let Some((_host, code)) = open_room(server, None).await else {
        return false;
    };

    let attempts = (0..5).map(|_| handshake(server, json!({ "role": "viewer", "room_code": code })));
    let results = join_all(attempts).await;

    let admitted = results
        .iter()
        .filter(|r| matches!(r, Ok((_, reply, _)) if accepted_code(reply).is_some()))
        .count();

    if admitted == 1 {
        println!("{} Exactly one of {} viewers admitted", "✓".green(), results.len());
        true
    } else {
        println!("{} {} viewers admitted", "✗".red(), admitted);
        false
    }
}
