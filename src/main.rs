use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use cluster_coordinator::config::{
    CoordinatorConfig, DEFAULT_APP_INBOX_SIZE, DEFAULT_HEARTBEAT_PERIOD_MS,
    DEFAULT_JOB_HISTORY_SIZE, DEFAULT_MAX_MISSED_HEARTBEATS, DEFAULT_MAX_RESULT_PARTITIONS,
};
use cluster_coordinator::coordinator::Coordinator;
use cluster_coordinator::grpc::convert::job_status_from_proto;
use cluster_coordinator::proto::client_service_client::ClientServiceClient;
use cluster_coordinator::proto::{
    ApplicationRequest, ApplicationResponse, GetClusterControllerInfoRequest,
    GetClusterTopologyRequest, GetNodeControllersInfoRequest, JobStatusRequest,
    JobStatusResponse, StartJobRequest,
};
use cluster_coordinator::shutdown::install_shutdown_handler;
use cluster_coordinator::topology::ClusterTopology;

#[derive(Parser, Debug)]
#[command(name = "cluster-coordinator")]
#[command(version)]
#[command(about = "Control-plane coordinator for a data-parallel execution cluster")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the coordinator
    Server(ServerArgs),

    /// Job commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Application commands
    App {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: AppCommands,
    },

    /// Cluster inspection commands
    Cluster {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ClusterCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address for the worker-facing control endpoint
    #[arg(long, env = "CC_CLUSTER_ADDR", default_value = "0.0.0.0:1099")]
    cluster_addr: SocketAddr,

    /// Address for the client-facing endpoint
    #[arg(long, env = "CC_CLIENT_ADDR", default_value = "0.0.0.0:1098")]
    client_addr: SocketAddr,

    /// Host advertised to clients (defaults to the client bind IP)
    #[arg(long, env = "CC_CLIENT_HOST")]
    client_host: Option<String>,

    /// Port for the read-only admin HTTP surface (optional)
    #[arg(long, env = "CC_HTTP_PORT")]
    http_port: Option<u16>,

    /// Root directory; the job log is written under <root>/logs/jobs
    #[arg(long, env = "CC_ROOT_DIR", default_value = ".")]
    root_dir: PathBuf,

    /// Number of terminated jobs kept for status queries
    #[arg(long, default_value_t = DEFAULT_JOB_HISTORY_SIZE)]
    job_history_size: usize,

    /// Heartbeat period advertised to workers, in milliseconds
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_PERIOD_MS)]
    heartbeat_period_ms: u64,

    /// Heartbeats a worker may miss before it is removed
    #[arg(long, default_value_t = DEFAULT_MAX_MISSED_HEARTBEATS)]
    max_missed_heartbeats: u32,

    /// Dead-node sweep period in milliseconds (defaults to the heartbeat period)
    #[arg(long)]
    sweep_period_ms: Option<u64>,

    /// Maximum relayed messages kept per application
    #[arg(long, default_value_t = DEFAULT_APP_INBOX_SIZE)]
    app_inbox_size: usize,

    /// Largest partition count a worker may declare for one result set
    #[arg(long, default_value_t = DEFAULT_MAX_RESULT_PARTITIONS)]
    max_result_partitions: usize,

    /// Cluster topology file (JSON)
    #[arg(long, env = "CC_TOPOLOGY")]
    topology: Option<PathBuf>,
}

// =============================================================================
// Client Arguments (shared by job, app and cluster commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Coordinator client endpoint
    #[arg(long, short = 'a', env = "CC_ADDR", default_value = "http://127.0.0.1:1098")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Client Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a job graph
    Submit {
        /// File containing the serialized job graph
        graph: PathBuf,

        /// Application the job belongs to
        #[arg(long, default_value = "")]
        app: String,

        /// Enable profiling for the job
        #[arg(long)]
        profile: bool,

        /// Wait for the job to terminate before returning
        #[arg(long)]
        wait: bool,
    },
    /// Get the status of a job
    Status {
        /// The job ID
        job_id: u64,
    },
    /// Block until a job terminates
    Wait {
        /// The job ID
        job_id: u64,
    },
}

#[derive(clap::Subcommand, Debug)]
enum AppCommands {
    /// Create an application context
    Create { name: String },
    /// Start an application on every node
    Start { name: String },
    /// Stop and remove an application
    Destroy { name: String },
}

#[derive(clap::Subcommand, Debug)]
enum ClusterCommands {
    /// Coordinator identity
    Info,
    /// Registered worker nodes
    Nodes,
    /// Configured network topology
    Topology,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobSubmitOutput {
    job_id: u64,
}

#[derive(Serialize)]
struct JobStatusOutput {
    job_id: u64,
    status: String,
    details: String,
}

#[derive(Serialize)]
struct ApplicationOutput {
    app_name: String,
    state: String,
}

#[derive(Serialize)]
struct ClusterInfoOutput {
    client_host: String,
    client_port: u32,
    http_port: Option<u32>,
}

#[derive(Serialize)]
struct NodeOutput {
    node_id: String,
    ip_address: String,
    control_address: Option<String>,
    data_address: Option<String>,
    cores: u32,
    memory_bytes: u64,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn job_status_to_string(status: i32) -> String {
    job_status_from_proto(status)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

fn format_address(address: Option<cluster_coordinator::proto::NetworkAddress>) -> Option<String> {
    address.map(|a| format!("{}:{}", a.host, a.port))
}

async fn create_client(
    args: &ClientArgs,
) -> Result<ClientServiceClient<Channel>, Box<dyn std::error::Error>> {
    let channel = Channel::from_shared(args.addr.clone())?.connect().await?;
    Ok(ClientServiceClient::new(channel))
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let topology = match &args.topology {
        Some(path) => Some(ClusterTopology::load(path)?),
        None => None,
    };

    let config = CoordinatorConfig {
        cluster_addr: args.cluster_addr,
        client_addr: args.client_addr,
        client_advertise_host: args.client_host,
        http_port: args.http_port,
        root_dir: args.root_dir,
        job_history_size: args.job_history_size,
        heartbeat_period_ms: args.heartbeat_period_ms,
        max_missed_heartbeats: args.max_missed_heartbeats,
        sweep_period_ms: args.sweep_period_ms,
        app_inbox_size: args.app_inbox_size,
        max_result_partitions: args.max_result_partitions,
        topology,
    };

    tracing::info!(
        cluster_addr = %config.cluster_addr,
        client_addr = %config.client_addr,
        http_port = ?config.http_port,
        root_dir = %config.root_dir.display(),
        "Starting cluster coordinator"
    );

    let shutdown = install_shutdown_handler()?;
    let coordinator = Coordinator::start(config).await?;
    coordinator.run_until(shutdown).await;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

fn print_job_status(
    response: JobStatusResponse,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            let output = JobStatusOutput {
                job_id: response.job_id,
                status: job_status_to_string(response.status),
                details: response.details,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job ID:  {}", response.job_id);
            println!("Status:  {}", job_status_to_string(response.status));
            if !response.details.is_empty() {
                println!("Details:");
                for line in response.details.lines() {
                    println!("  {}", line);
                }
            }
        }
    }
    Ok(())
}

fn print_application(
    response: ApplicationResponse,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            let output = ApplicationOutput {
                app_name: response.app_name,
                state: response.state,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Application: {}", response.app_name);
            println!("State:       {}", response.state);
        }
    }
    Ok(())
}

async fn handle_job_submit(
    client: &mut ClientServiceClient<Channel>,
    graph: PathBuf,
    app: String,
    profile: bool,
    wait: bool,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let graph = tokio::fs::read(&graph).await?;
    let flags = if profile {
        cluster_coordinator::job::JOB_FLAG_PROFILING
    } else {
        0
    };

    let response = match client
        .start_job(StartJobRequest {
            app_name: app,
            graph,
            flags,
        })
        .await
    {
        Ok(response) => response.into_inner(),
        Err(status) => {
            eprintln!("Error: Job submission failed: {}", status.message());
            std::process::exit(1);
        }
    };

    if wait {
        let status = client
            .wait_for_completion(JobStatusRequest {
                job_id: response.job_id,
            })
            .await?
            .into_inner();
        return print_job_status(status, output_format);
    }

    match output_format {
        OutputFormat::Json => {
            let output = JobSubmitOutput {
                job_id: response.job_id,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job submitted successfully!");
            println!("Job ID: {}", response.job_id);
        }
    }
    Ok(())
}

async fn handle_cluster_info(
    client: &mut ClientServiceClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .get_cluster_controller_info(GetClusterControllerInfoRequest {})
        .await?
        .into_inner();
    let http_port = (response.http_port != 0).then_some(response.http_port);

    match output_format {
        OutputFormat::Json => {
            let output = ClusterInfoOutput {
                client_host: response.client_host,
                client_port: response.client_port,
                http_port,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Cluster Coordinator");
            println!("{}", "=".repeat(40));
            println!("Client: {}:{}", response.client_host, response.client_port);
            match http_port {
                Some(port) => println!("Admin:  {}:{}", response.client_host, port),
                None => println!("Admin:  disabled"),
            }
        }
    }
    Ok(())
}

async fn handle_cluster_nodes(
    client: &mut ClientServiceClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .get_node_controllers_info(GetNodeControllersInfoRequest {})
        .await?
        .into_inner();

    let nodes: Vec<NodeOutput> = response
        .nodes
        .into_iter()
        .map(|n| NodeOutput {
            node_id: n.node_id,
            ip_address: n.ip_address,
            control_address: format_address(n.control_address),
            data_address: format_address(n.data_address),
            cores: n.cores,
            memory_bytes: n.memory_bytes,
        })
        .collect();

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&nodes)?);
        }
        OutputFormat::Table => {
            if nodes.is_empty() {
                println!("No nodes registered.");
                return Ok(());
            }
            println!("{:<16} {:<16} {:<22} CORES", "NODE", "IP", "CONTROL");
            println!("{}", "-".repeat(62));
            for node in &nodes {
                println!(
                    "{:<16} {:<16} {:<22} {}",
                    node.node_id,
                    node.ip_address,
                    node.control_address.as_deref().unwrap_or("-"),
                    node.cores
                );
            }
            println!();
            println!("{} node(s)", nodes.len());
        }
    }
    Ok(())
}

async fn handle_cluster_topology(
    client: &mut ClientServiceClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .get_cluster_topology(GetClusterTopologyRequest {})
        .await?
        .into_inner();

    if response.topology_json.is_empty() {
        println!("No topology configured.");
        return Ok(());
    }
    let topology: ClusterTopology = serde_json::from_str(&response.topology_json)?;
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&topology)?),
        OutputFormat::Table => print_switch(&topology.root, 0),
    }
    Ok(())
}

fn print_switch(switch: &cluster_coordinator::topology::NetworkSwitch, depth: usize) {
    println!("{}{}/", "  ".repeat(depth), switch.name);
    for terminal in &switch.terminals {
        println!("{}{}", "  ".repeat(depth + 1), terminal.name);
    }
    for child in &switch.switches {
        print_switch(child, depth + 1);
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Job { client, command } => {
            let mut grpc_client = create_client(&client).await?;

            match command {
                JobCommands::Submit {
                    graph,
                    app,
                    profile,
                    wait,
                } => {
                    handle_job_submit(&mut grpc_client, graph, app, profile, wait, &client.output)
                        .await?;
                }
                JobCommands::Status { job_id } => {
                    let response = grpc_client
                        .get_job_status(JobStatusRequest { job_id })
                        .await?
                        .into_inner();
                    print_job_status(response, &client.output)?;
                }
                JobCommands::Wait { job_id } => {
                    let response = grpc_client
                        .wait_for_completion(JobStatusRequest { job_id })
                        .await?
                        .into_inner();
                    print_job_status(response, &client.output)?;
                }
            }
        }
        Commands::App { client, command } => {
            let mut grpc_client = create_client(&client).await?;

            let response = match command {
                AppCommands::Create { name } => {
                    grpc_client
                        .create_application(ApplicationRequest { app_name: name })
                        .await?
                }
                AppCommands::Start { name } => {
                    grpc_client
                        .start_application(ApplicationRequest { app_name: name })
                        .await?
                }
                AppCommands::Destroy { name } => {
                    grpc_client
                        .destroy_application(ApplicationRequest { app_name: name })
                        .await?
                }
            };
            print_application(response.into_inner(), &client.output)?;
        }
        Commands::Cluster { client, command } => {
            let mut grpc_client = create_client(&client).await?;

            match command {
                ClusterCommands::Info => {
                    handle_cluster_info(&mut grpc_client, &client.output).await?;
                }
                ClusterCommands::Nodes => {
                    handle_cluster_nodes(&mut grpc_client, &client.output).await?;
                }
                ClusterCommands::Topology => {
                    handle_cluster_topology(&mut grpc_client, &client.output).await?;
                }
            }
        }
    }

    Ok(())
}
