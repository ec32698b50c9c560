use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use distributed_chat::common::{ChannelAddress, ChatEvent, ChatUser, PresenceStatus, UserId};
use distributed_chat::config::{self, AppConfig};
use distributed_chat::crypto::{KeyDirectory, LocalKeys};
use distributed_chat::network::{MeshTransport, P2PClient, parse_bootstrap_peers};
use distributed_chat::{ChannelParser, ChatController, PresenceRegistry};
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(
    name = "distributed-chat",
    version,
    about = "Serverless chat over a local mesh"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Display name announced to peers (overrides the config file)
    #[arg(long)]
    name: Option<String>,
    /// Peer multiaddr to dial at startup; may be repeated
    #[arg(long, value_name = "MULTIADDR")]
    connect: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    let name = cli
        .name
        .or_else(|| app_config.display_name.clone())
        .unwrap_or_else(|| "anonymous".to_string());

    let keys = LocalKeys::load_or_generate(&app_config.key_path)?;
    let user = ChatUser::new(UserId::new(), name);
    log::info!("Chatting as {} ({})", user.display_name, user.id);

    // core -> network
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    // network -> core
    let (net_tx, net_rx) = mpsc::channel(100);
    // core -> REPL
    let (chat_tx, chat_rx) = mpsc::channel(100);

    let client = P2PClient::new(
        net_tx,
        cmd_rx,
        parse_bootstrap_peers(&app_config.bootstrap_nodes),
        app_config.topic.clone(),
        app_config.listen_addr.clone(),
    );
    let network = tokio::spawn(async move {
        if let Err(err) = client.run().await {
            log::error!("Network client terminated: {err}");
        }
    });

    let transport = MeshTransport::new(cmd_tx);
    for address in &cli.connect {
        transport.connect(address.clone());
    }

    let registry = Arc::new(PresenceRegistry::new());
    let controller = ChatController::new(
        user,
        keys,
        Arc::clone(&registry),
        Arc::new(KeyDirectory::new()),
        transport,
        chat_tx,
        app_config.controller_config(),
    );
    let subscription = controller.spawn(net_rx);

    let parser = ChannelParser::new(app_config.global_channel_name.clone());
    let me = controller.local_user().id;
    tokio::spawn(print_events(chat_rx, parser.clone(), registry, me));

    run_repl(&controller, &parser, &mut app_config, &cli.config).await?;

    controller.update_status(PresenceStatus::Offline);
    subscription.shutdown().await;
    // last sender of the command channel; the network task flushes and exits
    drop(controller);
    if tokio::time::timeout(Duration::from_secs(2), network).await.is_err() {
        log::warn!("Network task did not stop in time");
    }
    Ok(())
}

async fn run_repl(
    controller: &ChatController<MeshTransport>,
    parser: &ChannelParser,
    app_config: &mut AppConfig,
    config_path: &str,
) -> std::io::Result<()> {
    println!(
        "\
        ----------------------------------\n\
        ---  DISTRIBUTED CHAT REPL v0.1 ---\n\
        ----------------------------------\n\
        \n\
        Type anything to send to #{global} or prefix your message\n\
        with a channel, e.g. #my-channel or @SomeUserName.\n\
        Note that the user has to be online. Commands:\n\
        /name NEW, /status online|away|offline, /quit\n",
        global = parser.global_channel_name()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            let (verb, arg) = command.split_once(' ').unwrap_or((command, ""));
            match verb {
                "quit" | "exit" => break,
                "name" if !arg.trim().is_empty() => {
                    let name = arg.trim();
                    controller.update_name(name);
                    if let Err(err) = app_config.persist_display_name(config_path, name) {
                        log::warn!("Could not save config to {config_path}: {err}");
                    }
                }
                "status" => match arg.parse::<PresenceStatus>() {
                    Ok(status) => controller.update_status(status),
                    Err(err) => println!("! {err}"),
                },
                _ => println!("! unknown command /{verb}"),
            }
            continue;
        }

        let mut parsed = parser.parse_message(input, controller.registry());
        if app_config.include_self_in_direct_messages {
            if let ChannelAddress::DirectMessage { recipients } = &mut parsed.channel {
                recipients.insert(controller.local_user().id);
            }
        }

        // failures are reported through ChatEvent::SendFailed
        let _ = controller.send(parsed.content, parsed.channel).await;
    }

    println!();
    Ok(())
}

async fn print_events(
    mut events: mpsc::Receiver<ChatEvent>,
    parser: ChannelParser,
    registry: Arc<PresenceRegistry>,
    me: UserId,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChatEvent::MessageAdded(message) => {
                println!(
                    "\r[{}] {}: {}\r",
                    parser.display_name(&message.channel, &registry, Some(&me)),
                    message.author.display_name,
                    message.content
                );
            }
            ChatEvent::PresenceChanged(presence) => {
                println!(
                    "\r> {} is now {}\r",
                    presence.user.display_name,
                    presence.status.description().to_lowercase()
                );
            }
            ChatEvent::SendFailed { reason, .. } => {
                println!("\r! could not send message: {reason}\r");
            }
        }
    }
}
