// ABOUTME: Entry point for the Chat-Meter client
// Wires configuration, storage and the remote client, then runs login and dialogue menus

use anyhow::Result;
use chat_meter::{
    app::{
        config::AppConfig,
        controller::{save_conversation, EndReason, Services, SessionController},
        settings::RequestSettings,
    },
    data::{
        Account, AccountDatabase, AccountLedger, CompletionClient, Conversation,
        ConversationRepository, InMemoryLedger, OpenAiClient,
    },
    ui::{
        menu::{self, ConversationChoice},
        Console, TerminalConsole,
    },
    utils::CostCalculator,
};
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const RULE: &str = "--------------------------------------------------";

#[tokio::main]
async fn main() -> Result<()> {
    let matches = parse_args();

    // Initialize logging if debug mode; stdout is reserved for the dialogue
    if matches.get_flag("debug") {
        tracing_subscriber::fmt()
            .with_env_filter("chat_meter=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    let config = load_config(&matches)?;
    let calculator = Arc::new(match &config.pricing_path {
        Some(path) => CostCalculator::load_from_json(path)?,
        None => CostCalculator::new(),
    });
    let db = Arc::new(AccountDatabase::open(&config.database_path())?);
    let client: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::new(
        &config.api_base_url,
        config.api_key()?,
        Duration::from_secs(config.request_timeout_secs),
    )?);
    let repository = Arc::new(ConversationRepository::new(config.conversations_dir()));

    let mut console = TerminalConsole::new();
    console.say(RULE);
    console.say("Welcome to Chat-Meter");
    console.say("");

    let Some(account) = menu::login_prompt(&mut console, db.as_ref())? else {
        console.say("Goodbye.");
        return Ok(());
    };
    console.say(&format!("Welcome, {}!", account.first_name));

    let ledger: Arc<dyn AccountLedger> = if account.is_guest() {
        Arc::new(InMemoryLedger::with_account(&account)?)
    } else {
        db.clone()
    };

    let mut settings = config.request.clone();
    if account.is_admin() {
        let edited = menu::admin_session(&mut console, &account, &db, settings.clone())?;
        if edited != settings
            && console.confirm("Save these prompt parameters as your defaults?")?
        {
            let path = config.save_request_defaults(&edited)?;
            console.say(&format!("Saved defaults to {}", path.display()));
        }
        settings = edited;
    }

    let balance = ledger.balance(&account.id)?;
    console.say(&format!(
        "Your current balance is {}",
        CostCalculator::format_cost(balance)
    ));

    match menu::select_model(&mut console, &calculator, &settings.model)? {
        Some(model) => settings = settings.with_model(model),
        None => return Ok(()),
    }

    let services = Services {
        client,
        ledger,
        calculator,
        repository: repository.clone(),
        export_dir: config.export_dir(),
        naming_model: config.naming_model().to_string(),
    };

    loop {
        let conversation = match menu::choose_conversation(&mut console, &repository)? {
            ConversationChoice::New => Conversation::new(None),
            ConversationChoice::Load(conversation) => conversation,
            ConversationChoice::Exit => break,
        };
        let prompt = system_prompt(&mut console, &account, &config)?;
        let conversation = conversation.with_system_prompt(prompt.as_deref());

        let (updated, reason) = run_dialogue(
            &mut console,
            &account,
            &db,
            &services,
            settings,
            conversation,
        )
        .await?;
        settings = updated;

        if reason == EndReason::InsufficientFunds {
            console.say(
                "You have run out of funds. Please contact an administrator to add more funds to your account.",
            );
            console.say("Exiting the application...");
            break;
        }
        if reason == EndReason::InputClosed {
            break;
        }
    }

    console.say("Thank you for using Chat-Meter");
    Ok(())
}

fn parse_args() -> ArgMatches {
    Command::new("chat-meter")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Chat-Meter Team")
        .about("Interactive chat client for completion APIs with per-user cost accounting")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("database")
                .long("database")
                .value_name("FILE")
                .help("Path to the accounts database"),
        )
        .arg(
            Arg::new("conversations-dir")
                .long("conversations-dir")
                .value_name("DIR")
                .help("Directory holding saved conversations"),
        )
        .arg(
            Arg::new("model")
                .short('m')
                .long("model")
                .value_name("MODEL")
                .help("Model used for new requests"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches()
}

/// File and environment first, then command-line flags
fn load_config(matches: &ArgMatches) -> Result<AppConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => AppConfig::load_from(&PathBuf::from(path))?,
        None => AppConfig::load()?,
    };

    if let Some(path) = matches.get_one::<String>("database") {
        config.database_path = Some(path.into());
    }
    if let Some(dir) = matches.get_one::<String>("conversations-dir") {
        config.conversations_dir = Some(dir.into());
    }
    if let Some(model) = matches.get_one::<String>("model") {
        config.request = config.request.clone().with_model(model.as_str());
        config.request.validate()?;
    }
    config.debug = matches.get_flag("debug");

    Ok(config)
}

/// System message for the next dialogue: an admin's own message wins over the configured one
fn system_prompt(
    console: &mut dyn Console,
    account: &Account,
    config: &AppConfig,
) -> Result<Option<String>> {
    let admin_prompt = if account.is_admin() {
        menu::system_message(console)?
    } else {
        None
    };
    Ok(admin_prompt.or_else(|| config.system_prompt.clone()))
}

/// Run one dialogue, record its session and offer to save it
async fn run_dialogue(
    console: &mut TerminalConsole,
    account: &Account,
    db: &AccountDatabase,
    services: &Services,
    settings: RequestSettings,
    conversation: Conversation,
) -> Result<(RequestSettings, EndReason)> {
    console.say("Beginning chat session....");
    console.say(RULE);
    console.say("Enter a prompt (use '\\n' for a newline). Type -help for a list of commands.");

    let controller =
        SessionController::new(account.clone(), settings, conversation, services.clone());
    let (mut outcome, result) = controller.run_to_end(console).await;

    if !account.is_guest() {
        db.record_session(&outcome.session)?;
    }
    let reason = result?;
    console.say(&format!(
        "This conversation cost {} over {} requests ({}).",
        CostCalculator::format_cost(outcome.session.accumulated_cost),
        outcome.session.request_count,
        humantime::format_duration(Duration::from_secs(outcome.session.elapsed().as_secs()))
    ));

    if outcome.conversation.exchange_count() > 0
        && reason != EndReason::InputClosed
        && console.confirm("Would you like to save this conversation?")?
    {
        save_conversation(&mut outcome.conversation, services, &outcome.settings, console).await?;
    }

    Ok((outcome.settings, reason))
}
