// ABOUTME: Menus around the dialogue: login, admin tools, model and conversation selection
// Every menu re-prompts on invalid input and treats closed input as leaving the menu

use super::Console;
use crate::app::settings::{Parameter, RequestSettings};
use crate::data::conversation::Conversation;
use crate::data::database::AccountDatabase;
use crate::data::ledger::{Account, AccountRole, AccountStore, NewAccount};
use crate::data::persistence::ConversationRepository;
use crate::utils::cost_calculator::{CostCalculator, DEFAULT_MODEL};
use crate::utils::error::{ChatMeterError, Result};

pub const MAX_LOGIN_ATTEMPTS: usize = 3;

const INVALID_INPUT: &str = "Error: Invalid input. Please try again.";

/// Read lines until one is non-empty; `None` if input closes first
fn read_required(console: &mut dyn Console, prompt: &str) -> Result<Option<String>> {
    loop {
        match console.read_line(prompt)? {
            None => return Ok(None),
            Some(line) if line.trim().is_empty() => console.say("Error: A value is required."),
            Some(line) => return Ok(Some(line.trim().to_string())),
        }
    }
}

/// Ask how the operator wants to identify. `None` means exit.
pub fn login_prompt(console: &mut dyn Console, store: &dyn AccountStore) -> Result<Option<Account>> {
    console.say("Would you like to login, or continue as a guest?");
    console.say("1. Login");
    console.say("2. Create an account");
    console.say("3. Continue as a guest");
    console.say("4. Exit");

    loop {
        let Some(action) = console.read_line("Enter a number: ")? else {
            return Ok(None);
        };
        match action.trim() {
            "1" => return login(console, store),
            "2" => return signup(console, store),
            "3" => return Ok(Some(Account::guest())),
            "4" => return Ok(None),
            _ => console.say(INVALID_INPUT),
        }
    }
}

fn login(console: &mut dyn Console, store: &dyn AccountStore) -> Result<Option<Account>> {
    for attempt in 1..=MAX_LOGIN_ATTEMPTS {
        let Some(username) = console.read_line("Enter your username: ")? else {
            return Ok(None);
        };
        let Some(password) = console.read_secret("Enter your password: ")? else {
            return Ok(None);
        };

        if let Some(account) = store.authenticate(username.trim(), &password)? {
            tracing::info!(username = %account.username, "authenticated");
            console.say("Authentication successful!");
            return Ok(Some(account));
        }

        console.say("Error: Invalid username or password.");
        let remaining = MAX_LOGIN_ATTEMPTS - attempt;
        if remaining > 0 {
            console.say(&format!("Attempts remaining: {}. Please try again.", remaining));
        }
    }

    tracing::warn!("too many failed login attempts");
    console.say("Too many incorrect attempts. Continuing as a guest.");
    Ok(Some(Account::guest()))
}

fn signup(console: &mut dyn Console, store: &dyn AccountStore) -> Result<Option<Account>> {
    console.say("Please enter the following information to create an account:");

    let mut fields = NewAccount {
        first_name: String::new(),
        last_name: String::new(),
        email: String::new(),
        username: String::new(),
        password: String::new(),
    };
    for (prompt, field) in [
        ("First name: ", &mut fields.first_name),
        ("Last name: ", &mut fields.last_name),
        ("Email: ", &mut fields.email),
        ("Username: ", &mut fields.username),
    ] {
        match read_required(console, prompt)? {
            Some(value) => *field = value,
            None => return Ok(None),
        }
    }
    fields.password = loop {
        match console.read_secret("Password: ")? {
            None => return Ok(None),
            Some(password) if password.is_empty() => console.say("Error: A value is required."),
            Some(password) => break password,
        }
    };

    loop {
        match store.create_account(fields.clone()) {
            Ok(account) => {
                console.say("Account created successfully!");
                return Ok(Some(account));
            }
            Err(err @ ChatMeterError::DuplicateUsername(_)) => {
                console.say(&format!("Error: {}", err));
                match read_required(console, "Username: ")? {
                    Some(username) => fields.username = username,
                    None => return Ok(None),
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Let the operator pick a model from the pricing table.
///
/// An empty answer picks the default model; `None` when input closes.
pub fn select_model(
    console: &mut dyn Console,
    calculator: &CostCalculator,
    current: &str,
) -> Result<Option<String>> {
    console.say("Available Models:");
    for entry in calculator.available_models() {
        let marker = if entry.id == current { " (current)" } else { "" };
        console.say(&format!(
            " - {} [{}] {}/token{}",
            entry.display_name,
            entry.id,
            CostCalculator::format_cost(entry.cost_per_token),
            marker
        ));
    }

    loop {
        let Some(answer) = console.read_line("Enter a model name: ")? else {
            return Ok(None);
        };
        if answer.trim().is_empty() {
            console.say(&format!("Using default model: {}", DEFAULT_MODEL));
            return Ok(Some(DEFAULT_MODEL.to_string()));
        }
        match calculator.find_model(&answer) {
            Some(entry) => return Ok(Some(entry.id.clone())),
            None => console.say("Error: Invalid model name. Please try again."),
        }
    }
}

fn list_parameters(console: &mut dyn Console, settings: &RequestSettings) {
    console.say("Prompt Options:");
    for parameter in Parameter::ALL {
        console.say(&format!(
            "{} -> {} (currently {})",
            parameter,
            parameter.description(),
            settings.value_of(parameter)
        ));
    }
}

/// Edit sampling parameters one at a time until `-done`
pub fn edit_prompt_parameters(
    console: &mut dyn Console,
    settings: RequestSettings,
) -> Result<RequestSettings> {
    let mut settings = settings;
    console.say(
        "Enter the name of the parameter you would like to modify. \
         Type '-list' to view all parameters. Type '-done' when all changes have been made.",
    );

    'editing: loop {
        let Some(input) = console.read_line("Parameter: ")? else {
            break;
        };
        let parameter = match input.trim() {
            "-done" => break,
            "-list" => {
                list_parameters(console, &settings);
                continue;
            }
            name => match name.parse::<Parameter>() {
                Ok(parameter) => parameter,
                Err(err) => {
                    console.say(&format!("Error: {}. Please try again.", err));
                    continue;
                }
            },
        };

        console.say(parameter.description());
        loop {
            let Some(raw) = console.read_line(&format!("{}: ", parameter))? else {
                break 'editing;
            };
            match settings.clone().with_parameter(parameter, &raw) {
                Ok(updated) => {
                    settings = updated;
                    console.say(&format!("{} updated successfully!", parameter));
                    break;
                }
                Err(err) => console.say(&format!("Error: {}. Please try again.", err)),
            }
        }
    }

    console.say("Proceeding with the following parameters:");
    for parameter in Parameter::ALL {
        console.say(&format!("{}: {}", parameter, settings.value_of(parameter)));
    }
    Ok(settings)
}

fn print_admin_help(console: &mut dyn Console) {
    console.say("Admin Options:");
    console.say("help -> View this help menu");
    console.say("users -> View all users");
    console.say("roles -> Set user roles");
    console.say("funds -> Add funds to a user's balance");
    console.say("prompts -> Customize prompt parameters");
    console.say("chat -> Proceed to chat. Ends the admin session.");
}

fn list_users(console: &mut dyn Console, db: &AccountDatabase) -> Result<()> {
    console.say("Users:");
    for account in db.list_accounts()? {
        let (sessions, spent) = db.spending_summary(&account.id)?;
        console.say(&format!(
            "{} balance {} spent {} over {} sessions",
            account,
            CostCalculator::format_cost(account.balance),
            CostCalculator::format_cost(spent),
            sessions
        ));
    }
    Ok(())
}

fn change_role(console: &mut dyn Console, db: &AccountDatabase) -> Result<()> {
    let Some(username) = read_required(console, "Username: ")? else {
        return Ok(());
    };
    let Some(account) = db.load_account_by_username(&username)? else {
        console.say("Error: User not found.");
        return Ok(());
    };
    console.say(&format!("User found: {}", account));

    loop {
        let Some(raw) = console.read_line("Role (user/admin): ")? else {
            return Ok(());
        };
        match raw.parse::<AccountRole>() {
            Ok(role) if role != AccountRole::Guest => {
                db.set_role(&username, role)?;
                console.say("Role updated successfully!");
                return Ok(());
            }
            _ => console.say("Error: Invalid role. Please try again."),
        }
    }
}

fn add_funds(console: &mut dyn Console, db: &AccountDatabase) -> Result<()> {
    let Some(username) = read_required(console, "Username: ")? else {
        return Ok(());
    };

    let amount = loop {
        let Some(raw) = console.read_line("Amount: ")? else {
            return Ok(());
        };
        match raw.trim().trim_start_matches('$').parse::<f64>() {
            Ok(amount) if amount.is_finite() && amount > 0.0 => break amount,
            _ => console.say("Error: Enter a positive amount."),
        }
    };

    match db.credit(&username, amount) {
        Ok(balance) => console.say(&format!(
            "New balance for {}: {}",
            username,
            CostCalculator::format_cost(balance)
        )),
        Err(ChatMeterError::AccountNotFound(_)) => console.say("Error: User not found."),
        Err(err) => return Err(err),
    }
    Ok(())
}

/// Optional admin tools run before chatting; returns the possibly edited settings
pub fn admin_session(
    console: &mut dyn Console,
    admin: &Account,
    db: &AccountDatabase,
    settings: RequestSettings,
) -> Result<RequestSettings> {
    if !console.confirm("Admin privileges enabled. Would you like to begin an admin session?")? {
        console.say("Proceeding to chat.");
        return Ok(settings);
    }

    console.say("Admin session initiated.");
    console.say("To view a list of admin options, type 'help'.");
    console.say("To end the admin session and start chatting, type 'chat'.");

    let mut settings = settings;
    while let Some(input) = console.read_line(&format!("{} > ", admin.username))? {
        match input.trim().to_lowercase().as_str() {
            "help" => print_admin_help(console),
            "users" => list_users(console, db)?,
            "roles" => change_role(console, db)?,
            "funds" => add_funds(console, db)?,
            "prompts" => settings = edit_prompt_parameters(console, settings)?,
            "chat" => break,
            _ => console.say("Error: Invalid command. Please try again."),
        }
    }
    Ok(settings)
}

/// Ask an admin for an optional system message to seed the conversation
pub fn system_message(console: &mut dyn Console) -> Result<Option<String>> {
    if !console.confirm("Would you like to add a system message?")? {
        return Ok(None);
    }
    read_required(console, "Enter your message: ")
}

#[derive(Debug)]
pub enum ConversationChoice {
    New,
    Load(Conversation),
    Exit,
}

/// The menu shown between dialogues
pub fn choose_conversation(
    console: &mut dyn Console,
    repository: &ConversationRepository,
) -> Result<ConversationChoice> {
    loop {
        console.say("1. Start a new conversation");
        console.say("2. Load a saved conversation");
        console.say("3. Exit");

        let Some(action) = console.read_line("Enter a number: ")? else {
            return Ok(ConversationChoice::Exit);
        };
        match action.trim() {
            "1" => return Ok(ConversationChoice::New),
            "3" => return Ok(ConversationChoice::Exit),
            "2" => {
                if let Some(conversation) = load_saved(console, repository)? {
                    return Ok(ConversationChoice::Load(conversation));
                }
            }
            _ => console.say(INVALID_INPUT),
        }
    }
}

fn load_saved(
    console: &mut dyn Console,
    repository: &ConversationRepository,
) -> Result<Option<Conversation>> {
    let saved = repository.list()?;
    if saved.is_empty() {
        console.say("No saved conversations.");
        return Ok(None);
    }

    console.say("Saved conversations:");
    for (index, entry) in saved.iter().enumerate() {
        console.say(&format!("{}. {} ({})", index + 1, entry.name, entry.display_size()));
    }

    let Some(answer) = console.read_line("Conversation name or number: ")? else {
        return Ok(None);
    };
    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(None);
    }

    let name = match answer.parse::<usize>() {
        Ok(index) if (1..=saved.len()).contains(&index) => saved[index - 1].name.clone(),
        _ => answer.to_string(),
    };
    match repository.load(&name) {
        Ok(conversation) => {
            console.say(&format!("Loaded \"{}\"", conversation.display_name()));
            Ok(Some(conversation))
        }
        Err(err @ ChatMeterError::ConversationNotFound(_)) => {
            console.say(&format!("Error: {}", err));
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
