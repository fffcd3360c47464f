// ABOUTME: Tests for the session controller state machine
// Drives dialogues with a mocked completion client, an in-memory ledger and a scripted console

#[cfg(test)]
mod tests {
    use crate::app::controller::{
        DialogueState, EndReason, Services, SessionController,
    };
    use crate::app::settings::RequestSettings;
    use crate::data::client::{Completion, FinishReason, MockCompletionClient};
    use crate::data::conversation::{Conversation, MessageRole};
    use crate::data::ledger::{Account, AccountLedger, AccountRole, InMemoryLedger};
    use crate::data::persistence::ConversationRepository;
    use crate::ui::scripted::ScriptedConsole;
    use crate::utils::cost_calculator::{CostCalculator, TokenUsage};
    use crate::utils::error::ChatMeterError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn account(balance: f64) -> Account {
        Account {
            id: "acct-1".to_string(),
            username: "ada".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            role: AccountRole::User,
            balance,
        }
    }

    fn completion(model: &str, reply: &str, prompt: u32, completion: u32) -> Completion {
        Completion {
            model: model.to_string(),
            reply: reply.to_string(),
            usage: TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
            },
            finish_reason: FinishReason::Stop,
        }
    }

    struct Harness {
        controller: SessionController,
        ledger: Arc<InMemoryLedger>,
        dir: TempDir,
    }

    fn harness(client: MockCompletionClient, balance: f64, settings: RequestSettings) -> Harness {
        let dir = TempDir::new().unwrap();
        let account = account(balance);
        let ledger = Arc::new(InMemoryLedger::with_account(&account).unwrap());
        let services = Services {
            client: Arc::new(client),
            ledger: ledger.clone(),
            calculator: Arc::new(CostCalculator::new()),
            repository: Arc::new(ConversationRepository::new(dir.path().join("conversations"))),
            export_dir: dir.path().join("exports"),
            naming_model: "gpt-3.5-turbo".to_string(),
        };
        let controller =
            SessionController::new(account, settings, Conversation::new(None), services);
        Harness {
            controller,
            ledger,
            dir,
        }
    }

    #[tokio::test]
    async fn test_single_exchange_debits_ledger() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .times(1)
            .returning(|_, _| Ok(completion("gpt-3.5-turbo", "Hi there!", 50, 30)));

        let mut h = harness(client, 1.0, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["Hello", "-end"]);

        let reason = h.controller.run(&mut console).await.unwrap();
        assert_eq!(reason, EndReason::UserEnded);

        assert!((h.ledger.balance("acct-1").unwrap() - 0.99984).abs() < 1e-9);
        let session = h.controller.session();
        assert_eq!(session.request_count, 1);
        assert!((session.accumulated_cost - 0.00016).abs() < 1e-9);

        let messages = h.controller.conversation().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].content, "Hi there!");
        assert!(console.printed("gpt-3.5-turbo > Hi there!"));
        assert_eq!(console.prompts[0], "ada > ");
    }

    #[tokio::test]
    async fn test_balance_command_changes_nothing() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().times(0);

        let mut h = harness(client, 1.0, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["-balance", "-end"]);
        h.controller.run(&mut console).await.unwrap();

        assert!(console.printed("Your balance is $1.00000"));
        assert!(h.controller.conversation().is_empty());
        assert_eq!(h.controller.session().accumulated_cost, 0.0);
        assert_eq!(h.controller.session().request_count, 0);
    }

    #[tokio::test]
    async fn test_preflight_refuses_before_remote_call() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().times(0);

        // 250 tokens at 0.000002 is a worst case of 0.0005
        let settings = RequestSettings {
            max_tokens: 250,
            ..RequestSettings::default()
        };
        let mut h = harness(client, 0.00001, settings);
        let mut console = ScriptedConsole::new(&["Hello"]);

        let reason = h.controller.run(&mut console).await.unwrap();
        assert_eq!(reason, EndReason::InsufficientFunds);
        assert_eq!(
            h.controller.state(),
            &DialogueState::Ended(EndReason::InsufficientFunds)
        );
        assert_eq!(console.remaining_inputs(), 1);
        assert!(h.controller.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_failed_exchange_rolls_back_prompt() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .times(1)
            .returning(|_, _| Err(ChatMeterError::RemoteCall("connection reset".to_string())));

        let mut h = harness(client, 1.0, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["Hello", "n"]);

        let reason = h.controller.run(&mut console).await.unwrap();
        assert_eq!(reason, EndReason::Abandoned);
        assert!(h.controller.conversation().is_empty());
        assert_eq!(h.controller.session().request_count, 0);
        assert_eq!(h.ledger.balance("acct-1").unwrap(), 1.0);
        assert!(console.printed("connection reset"));
    }

    #[tokio::test]
    async fn test_retry_sends_prompt_once_and_charges_once() {
        let mut client = MockCompletionClient::new();
        let mut calls = 0;
        client
            .expect_complete()
            .withf(|_, messages| messages.len() == 1 && messages[0].content == "Hello")
            .times(2)
            .returning(move |_, _| {
                calls += 1;
                if calls == 1 {
                    Err(ChatMeterError::RemoteCall("timeout".to_string()))
                } else {
                    Ok(completion("gpt-3.5-turbo", "Hi", 50, 30))
                }
            });

        let mut h = harness(client, 1.0, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["Hello", "y", "-end"]);

        let reason = h.controller.run(&mut console).await.unwrap();
        assert_eq!(reason, EndReason::UserEnded);
        assert_eq!(h.controller.conversation().len(), 2);
        assert_eq!(h.controller.session().request_count, 1);
        assert!((h.ledger.balance("acct-1").unwrap() - 0.99984).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_truncated_reply_is_a_soft_failure() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().times(1).returning(|_, _| {
            Ok(Completion {
                finish_reason: FinishReason::Length,
                ..completion("gpt-3.5-turbo", "Once upon a", 50, 1000)
            })
        });

        let mut h = harness(client, 1.0, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["Tell me a story", "no"]);

        let reason = h.controller.run(&mut console).await.unwrap();
        assert_eq!(reason, EndReason::Abandoned);
        assert!(h.controller.conversation().is_empty());
        assert_eq!(h.ledger.balance("acct-1").unwrap(), 1.0);
        assert!(console.printed("finish reason: length"));
    }

    #[tokio::test]
    async fn test_unknown_command_has_no_side_effects() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().times(0);

        let mut h = harness(client, 1.0, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["-quit", "", "-end"]);

        let reason = h.controller.run(&mut console).await.unwrap();
        assert_eq!(reason, EndReason::UserEnded);
        assert!(console.printed("Invalid command '-quit'"));
        assert!(h.controller.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_accumulated_cost_matches_sum_of_exchanges() {
        let usages = [(10, 5), (100, 50), (7, 3)];
        let mut client = MockCompletionClient::new();
        let mut calls = 0;
        client.expect_complete().times(3).returning(move |_, _| {
            let (prompt, reply) = usages[calls];
            calls += 1;
            Ok(completion("gpt-3.5-turbo-0613", "ok", prompt, reply))
        });

        let mut h = harness(client, 1.0, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["one", "two", "three", "-end"]);
        h.controller.run(&mut console).await.unwrap();

        let calculator = CostCalculator::new();
        let expected: f64 = usages
            .iter()
            .map(|(p, c)| calculator.cost("gpt-3.5-turbo-0613", (p + c) as u64).unwrap())
            .sum();

        let session = h.controller.session();
        assert_eq!(session.request_count, 3);
        assert!((session.accumulated_cost - expected).abs() < 1e-9);
        assert!((session.accumulated_cost - 0.00035).abs() < 1e-9);
        assert_eq!(h.controller.conversation().exchange_count(), 3);
    }

    #[tokio::test]
    async fn test_unpriced_reply_model_aborts_billing() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .times(1)
            .returning(|_, _| Ok(completion("mystery-model", "Hi", 50, 30)));

        let mut h = harness(client, 1.0, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["Hello", "-end"]);

        let reason = h.controller.run(&mut console).await.unwrap();
        assert_eq!(reason, EndReason::PricingLookupFailed);
        assert!(h.controller.conversation().is_empty());
        assert_eq!(h.controller.session().request_count, 0);
        assert_eq!(h.ledger.balance("acct-1").unwrap(), 1.0);
        assert!(console.printed("mystery-model"));
    }

    #[tokio::test]
    async fn test_unpriced_configured_model_ends_before_sending() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().times(0);

        let settings = RequestSettings::default().with_model("mystery-model");
        let mut h = harness(client, 1.0, settings);
        let mut console = ScriptedConsole::new(&["Hello"]);

        let reason = h.controller.run(&mut console).await.unwrap();
        assert_eq!(reason, EndReason::PricingLookupFailed);
    }

    #[tokio::test]
    async fn test_overdraft_delivers_reply_then_ends() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .times(1)
            .returning(|_, _| Ok(completion("gpt-3.5-turbo", "Long answer", 500, 1000)));

        let mut h = harness(client, 0.0021, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["Hello", "-end"]);

        let reason = h.controller.run(&mut console).await.unwrap();
        assert_eq!(reason, EndReason::InsufficientFunds);
        assert_eq!(h.ledger.balance("acct-1").unwrap(), 0.0);
        assert_eq!(h.controller.conversation().len(), 2);
        assert_eq!(h.controller.session().request_count, 1);
        assert!(console.printed("contact an administrator"));
    }

    #[tokio::test]
    async fn test_model_command_only_changes_settings() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().times(0);

        let mut h = harness(client, 1.0, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["-model", "gpt-4", "-end"]);
        h.controller.run(&mut console).await.unwrap();

        assert_eq!(h.controller.settings().model, "gpt-4");
        assert!(h.controller.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_info_reports_last_exchange() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .returning(|_, _| Ok(completion("gpt-3.5-turbo", "Hi", 50, 30)));

        let mut h = harness(client, 1.0, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["-info", "Hello", "-info", "-end"]);
        h.controller.run(&mut console).await.unwrap();

        assert!(console.printed("No exchanges yet."));
        assert!(console.printed("Total tokens: 80"));
        assert!(console.printed("Cost: $0.00016"));
        assert_eq!(h.controller.last_exchange().unwrap().usage.total(), 80);
    }

    #[tokio::test]
    async fn test_save_names_conversation_without_billing() {
        let mut client = MockCompletionClient::new();
        let mut calls = 0;
        client.expect_complete().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Ok(completion("gpt-3.5-turbo", "Hi", 50, 30))
            } else {
                Ok(completion("gpt-3.5-turbo", "Friendly Greeting", 40, 2))
            }
        });

        let mut h = harness(client, 1.0, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["Hello", "-save", "-end"]);
        h.controller.run(&mut console).await.unwrap();

        assert_eq!(h.controller.conversation().display_name(), "Friendly Greeting");
        assert_eq!(h.controller.conversation().len(), 2);
        assert_eq!(h.controller.session().request_count, 1);
        assert!(h
            .dir
            .path()
            .join("conversations")
            .join("Friendly-Greeting.json")
            .exists());
    }

    #[tokio::test]
    async fn test_export_writes_transcript() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .returning(|_, _| Ok(completion("gpt-3.5-turbo", "Hi", 50, 30)));

        let mut h = harness(client, 1.0, RequestSettings::default());
        let mut console = ScriptedConsole::new(&["Hello", "-export notes", "-end"]);
        h.controller.run(&mut console).await.unwrap();

        let path = h.dir.path().join("exports").join("notes.txt");
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("user: Hello"));
        assert!(contents.contains("assistant: Hi"));
    }

    /// Ledger whose balance lookups fail once any debit has gone through
    struct FailingAfterDebit {
        inner: InMemoryLedger,
        debited: AtomicBool,
    }

    impl AccountLedger for FailingAfterDebit {
        fn balance(&self, account_id: &str) -> crate::utils::error::Result<f64> {
            if self.debited.load(Ordering::SeqCst) {
                return Err(ChatMeterError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk gone",
                )));
            }
            self.inner.balance(account_id)
        }

        fn debit(&self, account_id: &str, amount: f64) -> crate::utils::error::Result<f64> {
            let balance = self.inner.debit(account_id, amount)?;
            self.debited.store(true, Ordering::SeqCst);
            Ok(balance)
        }
    }

    #[tokio::test]
    async fn test_run_to_end_keeps_billed_exchanges_on_error() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .times(1)
            .returning(|_, _| Ok(completion("gpt-3.5-turbo", "Hi", 50, 30)));

        let dir = TempDir::new().unwrap();
        let account = account(1.0);
        let ledger = Arc::new(FailingAfterDebit {
            inner: InMemoryLedger::with_account(&account).unwrap(),
            debited: AtomicBool::new(false),
        });
        let services = Services {
            client: Arc::new(client),
            ledger: ledger.clone(),
            calculator: Arc::new(CostCalculator::new()),
            repository: Arc::new(ConversationRepository::new(dir.path().join("conversations"))),
            export_dir: dir.path().join("exports"),
            naming_model: "gpt-3.5-turbo".to_string(),
        };
        let controller = SessionController::new(
            account,
            RequestSettings::default(),
            Conversation::new(None),
            services,
        );

        let mut console = ScriptedConsole::new(&["Hello", "-end"]);
        let (outcome, result) = controller.run_to_end(&mut console).await;

        assert!(matches!(result, Err(ChatMeterError::Io(_))));
        assert!(outcome.session.is_finished());
        assert_eq!(outcome.session.request_count, 1);
        assert!((outcome.session.accumulated_cost - 0.00016).abs() < 1e-9);
        assert_eq!(outcome.conversation.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_input_ends_dialogue() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().times(0);

        let h = harness(client, 1.0, RequestSettings::default());
        let mut controller = h.controller;
        let mut console = ScriptedConsole::new(&[]);

        let reason = controller.run(&mut console).await.unwrap();
        assert_eq!(reason, EndReason::InputClosed);

        let outcome = controller.finish();
        assert!(outcome.session.is_finished());
        assert_eq!(outcome.reason, EndReason::InputClosed);
    }
}
