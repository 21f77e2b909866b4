mod input;
mod render;

use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, info};

use medlink_client::{
    Channel, ClientConfig, Command, Delivery, Identity, RestClient, Session, WsConnector,
};

use input::Input;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they stay out of the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medlink=info,medlink_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env()?;
    let api = RestClient::new(&config)?;

    let user = api
        .current_user()
        .await
        .context("could not load the signed-in user")?;
    let identity = Identity::from_user(user).context("signed-in user has no id")?;
    info!(
        "Signed in as {} ({})",
        identity.user.display_name(),
        identity.self_id
    );

    // One channel for the whole session, released on logout.
    let channel = Channel::connect(
        WsConnector::new(&config)?,
        identity.self_id.clone(),
        config.reconnect,
    );
    let mut session = Session::new(api, channel, identity, &config);
    let mut updates = session.subscribe_updates();
    let mut printer = render::Printer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("MedLink chat. /help for commands.");
    session.reload();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    session.handle_command(Command::Logout);
                    break;
                };
                if !dispatch(&mut session, input::parse(&line)) {
                    break;
                }
            }
            alive = session.step() => {
                if !alive {
                    break;
                }
            }
        }

        loop {
            match updates.try_recv() {
                Ok(update) => printer.update(&session, update),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        if session.is_halted() {
            break;
        }
    }

    // Let the leave and stop-typing frames reach the server.
    if tokio::time::timeout(Duration::from_secs(2), session.channel().stopped())
        .await
        .is_err()
    {
        debug!("Channel still busy at exit");
    }
    info!("Bye");
    Ok(())
}

/// Returns false when the user asked to quit.
fn dispatch(session: &mut Session<RestClient>, input: Input) -> bool {
    match input {
        Input::Session(command) => session.handle_command(command),
        Input::Open(target) => {
            let id = match target.parse::<usize>() {
                Ok(n) if n >= 1 => session
                    .visible_conversations()
                    .get(n - 1)
                    .map(|c| c.id.clone()),
                _ => Some(target),
            };
            match id {
                Some(id) => session.handle_command(Command::Open(id)),
                None => println!("! no conversation at that position, try /list"),
            }
        }
        Input::Accept(id) => match id.or_else(|| open_id(session)) {
            Some(id) => session.handle_command(Command::Accept(id)),
            None => println!("! which conversation? /accept <id>"),
        },
        Input::Ignore(id) => match id.or_else(|| open_id(session)) {
            Some(id) => session.handle_command(Command::Ignore(id)),
            None => println!("! which conversation? /ignore <id>"),
        },
        Input::Retry(client_ref) => match client_ref.or_else(|| last_failed(session)) {
            Some(client_ref) => session.handle_command(Command::Retry(client_ref)),
            None => println!("! nothing to retry"),
        },
        Input::List => render::directory(session),
        Input::Help => println!("{}", input::HELP),
        Input::Quit => {
            session.handle_command(Command::Logout);
            return false;
        }
        Input::Nothing => {}
        Input::Unknown(line) => println!("! unknown command {line}, /help lists them"),
    }
    true
}

fn open_id(session: &Session<RestClient>) -> Option<String> {
    session.view().map(|v| v.id().to_string())
}

fn last_failed(session: &Session<RestClient>) -> Option<String> {
    session
        .view()?
        .messages()
        .iter()
        .rev()
        .find(|vm| vm.delivery == Delivery::Failed)
        .and_then(|vm| vm.client_ref.clone())
}
