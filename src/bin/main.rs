use ledger_chat::{
    config::AppConfig,
    confirmation::Choice,
    conversational::{Conversation, Services, Turn},
    memory::{Author, Message},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const SESSION: &str = "terminal";

/// Buttons from the most recent confirmation prompt
struct Offer {
    pending_id: Uuid,
    choices: Vec<Choice>,
}

impl Offer {
    /// The button a line names, if it is one of the offered numbers.
    /// Anything else (`500`, `lunch 250`) is ordinary chat text.
    fn pick(&self, input: &str) -> Option<Choice> {
        let index: usize = input.parse().ok()?;
        index.checked_sub(1).and_then(|i| self.choices.get(i)).copied()
    }
}

fn print_message(message: &Message, offer: &mut Option<Offer>) {
    match message.author {
        Author::User => {}
        Author::Assistant => println!("< {}", message.text),
        Author::Confirmation => {
            println!("? {}", message.text);
            let counterpart = message
                .candidates
                .first()
                .and_then(|c| c.counterpart.as_deref());
            for (i, choice) in message.choices.iter().enumerate() {
                println!("  {}. {}", i + 1, choice.label(counterpart));
            }

            *offer = message.pending_id.map(|pending_id| Offer {
                pending_id,
                choices: message.choices.clone(),
            });
        }
    }
}

fn print_turn(turn: &Turn, offer: &mut Option<Offer>) {
    for message in &turn.messages {
        print_message(message, offer);
    }
    if turn.pending_id.is_none() {
        *offer = None;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr so they don't interleave with the chat
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    let services = Services::from_config(&config)?;
    let user = AppConfig::local_user();

    info!(user = %user.display_name(), "Ledger Chat starting");

    let mut conversation = Conversation::open(SESSION, services).await;
    let mut offer: Option<Offer> = None;

    for message in conversation.state().timeline.messages() {
        print_message(message, &mut offer);
    }
    if conversation.state().pending.is_none() {
        offer = None;
    }

    println!("Type a transaction or a question. Numbers answer prompts, /clear wipes history, /quit exits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                conversation.clear().await?;
                offer = None;
                println!("< History cleared");
                continue;
            }
            _ => {}
        }

        let picked = offer
            .as_ref()
            .and_then(|current| current.pick(input).map(|choice| (current.pending_id, choice)));
        if let Some((pending_id, choice)) = picked {
            let turn = conversation.choose(&user, pending_id, choice).await;
            print_turn(&turn, &mut offer);
            continue;
        }

        let turn = conversation.submit(&user, input).await;
        print_turn(&turn, &mut offer);
    }

    Ok(())
}
