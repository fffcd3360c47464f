// ABOUTME: Session controller driving one interactive dialogue
// Classifies input, runs commands, sends prompts and settles the cost of each exchange

use crate::app::commands::{classify, help_text, Command, Input};
use crate::app::settings::RequestSettings;
use crate::data::client::{Completion, CompletionClient};
use crate::data::conversation::{Conversation, MessageRole};
use crate::data::export::export_transcript;
use crate::data::ledger::{Account, AccountLedger};
use crate::data::persistence::ConversationRepository;
use crate::data::session::Session;
use crate::ui::{menu, Console};
use crate::utils::cost_calculator::{CostCalculator, TokenUsage};
use crate::utils::error::{ChatMeterError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SEPARATOR: &str = "--------------------------------------------------";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    UserEnded,
    InsufficientFunds,
    /// The operator declined to retry a failed exchange
    Abandoned,
    PricingLookupFailed,
    InputClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueState {
    Idle,
    AwaitingInput,
    Classifying,
    ExecutingCommand,
    SendingPrompt,
    Ended(EndReason),
}

/// Collaborators shared by every dialogue of a process run
#[derive(Clone)]
pub struct Services {
    pub client: Arc<dyn CompletionClient>,
    pub ledger: Arc<dyn AccountLedger>,
    pub calculator: Arc<CostCalculator>,
    pub repository: Arc<ConversationRepository>,
    pub export_dir: PathBuf,
    pub naming_model: String,
}

/// Billing details of the most recent completed exchange
#[derive(Debug, Clone)]
pub struct ExchangeRecord {
    pub model: String,
    pub usage: TokenUsage,
    pub cost: f64,
    pub elapsed: Duration,
}

/// Everything left once a dialogue has ended
#[derive(Debug)]
pub struct DialogueOutcome {
    pub reason: EndReason,
    pub session: Session,
    pub conversation: Conversation,
    pub settings: RequestSettings,
}

pub struct SessionController {
    account: Account,
    settings: RequestSettings,
    conversation: Conversation,
    session: Session,
    services: Services,
    state: DialogueState,
    last_exchange: Option<ExchangeRecord>,
}

impl SessionController {
    pub fn new(
        account: Account,
        settings: RequestSettings,
        conversation: Conversation,
        services: Services,
    ) -> Self {
        let session = Session::start(&account.id);
        Self {
            account,
            settings,
            conversation,
            session,
            services,
            state: DialogueState::Idle,
            last_exchange: None,
        }
    }

    pub fn state(&self) -> &DialogueState {
        &self.state
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn settings(&self) -> &RequestSettings {
        &self.settings
    }

    pub fn last_exchange(&self) -> Option<&ExchangeRecord> {
        self.last_exchange.as_ref()
    }

    /// Drive the dialogue until it ends and return why it ended.
    ///
    /// Errors returned here come from storage, not from the remote call;
    /// remote failures are handled inside the loop with a retry prompt.
    pub async fn run(&mut self, console: &mut dyn Console) -> Result<EndReason> {
        if self.state == DialogueState::Idle {
            self.state = DialogueState::AwaitingInput;
        }

        loop {
            if let DialogueState::Ended(reason) = &self.state {
                return Ok(reason.clone());
            }

            if let Some(reason) = self.preflight(console)? {
                self.end(reason);
                continue;
            }

            let prompt = format!("{} > ", self.account.username);
            let Some(line) = console.read_line(&prompt)? else {
                self.end(EndReason::InputClosed);
                continue;
            };

            self.state = DialogueState::Classifying;
            match classify(&line) {
                Input::Empty => self.state = DialogueState::AwaitingInput,
                Input::UnknownCommand(name) => {
                    console.say(&ChatMeterError::InvalidCommand(name).to_string());
                    self.state = DialogueState::AwaitingInput;
                }
                Input::Command(command) => {
                    self.state = DialogueState::ExecutingCommand;
                    self.execute(command, console).await?;
                }
                Input::Prompt(text) => {
                    self.state = DialogueState::SendingPrompt;
                    self.exchange(text, console).await?;
                }
            }
        }
    }

    /// Run the dialogue and finish it whatever the result, so exchanges
    /// already billed are never lost when the run stops on an error
    pub async fn run_to_end(
        mut self,
        console: &mut dyn Console,
    ) -> (DialogueOutcome, Result<EndReason>) {
        let result = self.run(console).await;
        if let Err(err) = &result {
            tracing::warn!(session = %self.session.id, error = %err, "dialogue stopped on error");
        }
        (self.finish(), result)
    }

    /// Close the session and hand back the dialogue's results
    pub fn finish(mut self) -> DialogueOutcome {
        self.session.finish();
        let reason = match self.state {
            DialogueState::Ended(reason) => reason,
            _ => EndReason::UserEnded,
        };
        DialogueOutcome {
            reason,
            session: self.session,
            conversation: self.conversation,
            settings: self.settings,
        }
    }

    fn end(&mut self, reason: EndReason) {
        tracing::debug!(session = %self.session.id, ?reason, "dialogue ended");
        self.session.finish();
        self.state = DialogueState::Ended(reason);
    }

    /// Refuse the next request when the balance cannot cover its worst case
    fn preflight(&self, console: &mut dyn Console) -> Result<Option<EndReason>> {
        let balance = self.services.ledger.balance(&self.account.id)?;
        let worst_case = match self
            .services
            .calculator
            .max_possible_cost(&self.settings.model, self.settings.max_tokens)
        {
            Ok(cost) => cost,
            Err(err @ ChatMeterError::PricingLookupFailed { .. }) => {
                console.say(&format!("Error: {}", err));
                return Ok(Some(EndReason::PricingLookupFailed));
            }
            Err(err) => return Err(err),
        };

        if balance <= 0.0 || balance < worst_case {
            tracing::info!(
                account = %self.account.id,
                balance,
                worst_case,
                "pre-flight balance check refused request"
            );
            console.say(&format!(
                "Error: {}",
                ChatMeterError::InsufficientFunds {
                    required: worst_case,
                    available: balance,
                }
            ));
            return Ok(Some(EndReason::InsufficientFunds));
        }
        Ok(None)
    }

    async fn execute(&mut self, command: Command, console: &mut dyn Console) -> Result<()> {
        match command {
            Command::Help => {
                console.say("Commands:");
                console.say(&help_text());
            }
            Command::Balance => {
                let balance = self.services.ledger.balance(&self.account.id)?;
                console.say(&format!(
                    "Your balance is {}",
                    CostCalculator::format_cost(balance)
                ));
            }
            Command::Model => {
                if let Some(model) =
                    menu::select_model(console, &self.services.calculator, &self.settings.model)?
                {
                    self.settings = self.settings.clone().with_model(model);
                    console.say(&format!("Model set to {}", self.settings.model));
                }
            }
            Command::End => {
                self.end(EndReason::UserEnded);
                return Ok(());
            }
            Command::Info => self.report_info(console),
            Command::Save => {
                if self.conversation.history().is_empty() {
                    console.say("Nothing to save yet.");
                } else {
                    save_conversation(
                        &mut self.conversation,
                        &self.services,
                        &self.settings,
                        console,
                    )
                    .await?;
                }
            }
            Command::Export(name) => match export_transcript(
                &self.conversation,
                &self.services.export_dir,
                name.as_deref(),
                &self.account.first_name,
            ) {
                Ok(path) => console.say(&format!("Conversation exported to {}", path.display())),
                Err(err) => console.say(&format!("Error: could not export conversation: {}", err)),
            },
        }

        self.state = DialogueState::AwaitingInput;
        Ok(())
    }

    fn report_info(&self, console: &mut dyn Console) {
        console.say(&format!("Session: {}", self.session.id));
        console.say(&format!(
            "Started: {} ({} ago)",
            self.session.start_time.format("%Y-%m-%d %H:%M:%S"),
            humantime::format_duration(Duration::from_secs(self.session.elapsed().as_secs()))
        ));
        console.say(&format!("Requests: {}", self.session.request_count));
        console.say(&format!(
            "Session cost: {}",
            CostCalculator::format_cost(self.session.accumulated_cost)
        ));
        console.say(&format!(
            "Conversation: {} ({} messages)",
            self.conversation.display_name(),
            self.conversation.len()
        ));
        console.say(&format!("Model: {}", self.settings.model));

        match &self.last_exchange {
            Some(last) => {
                console.say(&format!("Last model: {}", last.model));
                console.say(&format!("Prompt tokens: {}", last.usage.prompt_tokens));
                console.say(&format!("Completion tokens: {}", last.usage.completion_tokens));
                console.say(&format!("Total tokens: {}", last.usage.total()));
                console.say(&format!("Cost: {}", CostCalculator::format_cost(last.cost)));
            }
            None => console.say("No exchanges yet."),
        }
    }

    /// Send one prompt, retrying on failure until it completes or the operator gives up
    async fn exchange(&mut self, prompt: String, console: &mut dyn Console) -> Result<()> {
        loop {
            self.conversation.append(MessageRole::User, prompt.clone())?;

            console.waiting_started(&self.settings.model);
            let started = Instant::now();
            let result = self
                .services
                .client
                .complete(&self.settings, self.conversation.messages())
                .await;
            let elapsed = started.elapsed();
            console.waiting_finished(elapsed);

            let failure = match result {
                Ok(completion) if completion.finish_reason.is_complete() => {
                    return self.settle(completion, elapsed, console);
                }
                Ok(completion) => format!(
                    "The response was incomplete (finish reason: {})",
                    completion.finish_reason
                ),
                Err(err) if err.is_recoverable() => err.to_string(),
                Err(err) => {
                    self.conversation.rollback_pending_prompt();
                    return Err(err);
                }
            };

            // No reply means no charge and no trace of the prompt
            self.conversation.rollback_pending_prompt();
            tracing::warn!(model = %self.settings.model, %failure, "exchange failed");
            console.say(&format!("Error: {}", failure));

            if !console.confirm("Would you like to try again?")? {
                self.end(EndReason::Abandoned);
                return Ok(());
            }
        }
    }

    /// Price, debit and record a completed exchange
    fn settle(
        &mut self,
        completion: Completion,
        elapsed: Duration,
        console: &mut dyn Console,
    ) -> Result<()> {
        let cost = match self
            .services
            .calculator
            .cost_from_usage(&completion.model, &completion.usage)
        {
            Ok(cost) => cost,
            Err(err) => {
                self.conversation.rollback_pending_prompt();
                console.say(&format!("Error: {}", err));
                self.end(EndReason::PricingLookupFailed);
                return Ok(());
            }
        };

        let exhausted = match self.services.ledger.debit(&self.account.id, cost) {
            Ok(balance) => {
                tracing::info!(account = %self.account.id, cost, balance, "debited exchange");
                false
            }
            Err(ChatMeterError::InsufficientFunds { .. }) => true,
            Err(err) => {
                self.conversation.rollback_pending_prompt();
                return Err(err);
            }
        };

        self.conversation
            .append(MessageRole::Assistant, completion.reply.clone())?;
        self.session.record_exchange(cost);
        console.say(&format!("{} > {}", completion.model, completion.reply));
        console.say(SEPARATOR);

        self.last_exchange = Some(ExchangeRecord {
            model: completion.model,
            usage: completion.usage,
            cost,
            elapsed,
        });

        if exhausted {
            console.say("Your balance has run out. Please contact an administrator for more funds.");
            self.end(EndReason::InsufficientFunds);
        } else {
            self.state = DialogueState::AwaitingInput;
        }
        Ok(())
    }
}

/// Name the conversation with the naming model and write it to the repository.
///
/// A naming failure keeps the current display name; a write failure is reported
/// and returned as `Ok(None)`.
pub async fn save_conversation(
    conversation: &mut Conversation,
    services: &Services,
    settings: &RequestSettings,
    console: &mut dyn Console,
) -> Result<Option<PathBuf>> {
    let naming_settings = settings.clone().with_model(services.naming_model.clone());
    if let Err(err) = conversation
        .derive_display_name(services.client.as_ref(), &naming_settings)
        .await
    {
        tracing::warn!(error = %err, "could not derive conversation name");
        console.say(&format!(
            "Could not name the conversation ({}); saving it as {}",
            err,
            conversation.display_name()
        ));
    }

    match services.repository.save(conversation) {
        Ok(path) => {
            console.say(&format!(
                "Conversation saved as \"{}\"",
                conversation.display_name()
            ));
            Ok(Some(path))
        }
        Err(err) => {
            console.say(&format!("Error: could not save conversation: {}", err));
            Ok(None)
        }
    }
}
