#![forbid(unsafe_code)]

mod api_client;
mod cli;
mod commands;
mod control_client;
mod shutdown;
mod startup;

use std::path::Path;

use anyhow::Result;
use domain::timeout::entity::ProtocolTimeouts;

use api_client::ApiClient;
use cli::{Command, DaemonCommand, DestCommand, ServiceCommand, TimeoutCommand, TunablesCommand};
use control_client::AdminClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();
    let output = cli.output;

    let Some(command) = cli.command.as_ref() else {
        // No subcommand = run the daemon
        return startup::run(&cli).await;
    };

    match command {
        Command::Version => {
            println!("ipvsd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }

        Command::Status { conn } => {
            let client = ApiClient::new(&conn.host, conn.port, cli.token.clone())?;
            commands::cmd_status(&client, output).await
        }

        Command::Tunables(args) => {
            let client = ApiClient::new(&args.conn.host, args.conn.port, cli.token.clone())?;
            match &args.command {
                TunablesCommand::Get => commands::cmd_tunables_get(&client, output).await,
                TunablesCommand::Set(set) => commands::cmd_tunables_set(&client, set, output).await,
            }
        }

        Command::Service(cmd) => {
            let mut client = admin_client(&cli).await?;
            match cmd {
                ServiceCommand::Add(opts) => {
                    commands::cmd_service_add(&mut client, opts, output).await
                }
                ServiceCommand::Edit(opts) => {
                    commands::cmd_service_edit(&mut client, opts, output).await
                }
                ServiceCommand::Delete { target } => {
                    commands::cmd_service_delete(&mut client, target, output).await
                }
            }
        }

        Command::Dest(cmd) => {
            let mut client = admin_client(&cli).await?;
            match cmd {
                DestCommand::Add(opts) => commands::cmd_dest_add(&mut client, opts, output).await,
                DestCommand::Edit(opts) => {
                    commands::cmd_dest_edit(&mut client, opts, output).await
                }
                DestCommand::Delete {
                    target,
                    real_server,
                } => commands::cmd_dest_delete(&mut client, target, *real_server, output).await,
            }
        }

        Command::List { target } => {
            let mut client = admin_client(&cli).await?;
            commands::cmd_list(&mut client, target, output).await
        }

        Command::Flush => {
            let mut client = admin_client(&cli).await?;
            commands::cmd_flush(&mut client, output).await
        }

        Command::Zero { target } => {
            let mut client = admin_client(&cli).await?;
            commands::cmd_zero(&mut client, target, output).await
        }

        Command::Info => {
            let mut client = admin_client(&cli).await?;
            commands::cmd_info(&mut client, output).await
        }

        Command::Timeout(cmd) => {
            let mut client = admin_client(&cli).await?;
            match cmd {
                TimeoutCommand::Get => commands::cmd_timeout_get(&mut client, output).await,
                TimeoutCommand::Set { tcp, tcp_fin, udp } => {
                    let update = ProtocolTimeouts {
                        tcp: *tcp,
                        tcp_fin: *tcp_fin,
                        udp: *udp,
                    };
                    commands::cmd_timeout_set(&mut client, update, output).await
                }
            }
        }

        Command::Daemon(cmd) => {
            let mut client = admin_client(&cli).await?;
            match cmd {
                DaemonCommand::Start {
                    role,
                    mcast_interface,
                    syncid,
                } => {
                    commands::cmd_daemon_start(&mut client, *role, mcast_interface, *syncid, output)
                        .await
                }
                DaemonCommand::Stop { role } => {
                    commands::cmd_daemon_stop(&mut client, *role, output).await
                }
                DaemonCommand::Status => commands::cmd_daemon_status(&mut client, output).await,
            }
        }
    }
}

async fn admin_client(cli: &cli::Cli) -> Result<AdminClient> {
    AdminClient::connect(Path::new(&cli.socket)).await
}
