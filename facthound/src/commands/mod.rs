use std::{
    io::{BufRead, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use facthound::{
    api::{Post, Thread},
    backend::HttpBackend,
    chain::{PreparedCall, Web3Chain},
    config::Config,
    contract::FactHoundContract,
    coordinator::{Coordinator, TransactionState},
    error::Error,
    policy::{ActionContext, ActionOutcome, ActionPolicy, CreateQuestion, PostReply, RedeemBounty, SelectAnswer, SubmitAnswer},
    session::{siwe_message, SessionContext, SessionGuard},
    utils::{checksum_address, explorer_tx_url, extract_keypair_from_str, format_ether, parse_ether},
    wallet::{Approval, AutoApprove, LocalWallet, Wallet},
    BlockClient,
};
use log::{debug, info};
use reqwest::Url;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// config file
    #[arg(short, long, default_value = "config.json")]
    pub(crate) config: PathBuf,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

impl Cli {
    pub(crate) fn parse_args() -> Self {
        Cli::parse()
    }
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Create a backend account
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Log in with username and password
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Log in by signing a message with the configured wallet
    LoginSiwe,
    /// Drop the cached session
    Logout,
    /// Show the logged-in account
    Whoami,
    /// Show a thread with its question and answers
    Thread {
        #[arg(long)]
        id: u64,
    },
    /// Show a user's questions and answers
    History {
        #[arg(long)]
        user: u64,
    },
    /// Ask a question, optionally escrowing a bounty
    Ask {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        text: String,
        /// repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// bounty in native currency, e.g. 0.01
        #[arg(long, default_value = "0")]
        bounty: String,
    },
    /// Post a reply in a thread
    Reply {
        #[arg(long)]
        thread: u64,
        #[arg(long)]
        text: String,
    },
    /// Answer a question
    Answer {
        #[arg(long)]
        thread: u64,
        #[arg(long)]
        question: u64,
        #[arg(long)]
        text: String,
    },
    /// Select the best answer to your question
    Select {
        #[arg(long)]
        thread: u64,
        #[arg(long)]
        question: u64,
        #[arg(long)]
        answer: u64,
    },
    /// Redeem the bounty of a question your answer won
    Redeem {
        #[arg(long)]
        thread: u64,
        #[arg(long)]
        question: u64,
        #[arg(long)]
        answer: u64,
    },
    /// Print a config template
    ShowConfig,
}

/// Asks on the terminal before every signature. The read runs on a blocking
/// thread so Ctrl-C can still tear the coordinator down while it waits.
struct TerminalApproval;

#[async_trait]
impl Approval for TerminalApproval {
    async fn approve(&self, request: &PreparedCall) -> bool {
        let call = &request.call;
        let question = format!(
            "sign {} on {} with value {} (gas {})? [y/N] ",
            call.function,
            checksum_address(&call.to),
            format_ether(call.value.unwrap_or_default()),
            request.gas
        );
        let answer = tokio::task::spawn_blocking(move || {
            print!("{}", question);
            std::io::stdout().flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok::<_, std::io::Error>(line)
        })
        .await;
        match answer {
            Ok(Ok(line)) => line.trim().eq_ignore_ascii_case("y"),
            Ok(Err(e)) => {
                debug!("approval prompt failed: {}", e);
                false
            }
            Err(e) => {
                debug!("approval prompt aborted: {}", e);
                false
            }
        }
    }
}

fn print_thread(thread: &Thread) {
    println!("#{} {}", thread.thread_id, thread.topic);
    for post in &thread.posts {
        println!("  {}", post);
    }
}

fn render(state: &TransactionState, explorer: &str) {
    match state {
        TransactionState::Pending { tx } => {
            println!("pending: {}", explorer_tx_url(explorer, tx));
        }
        TransactionState::Preparing | TransactionState::AwaitingSignature => println!("{}", state),
        _ => {}
    }
}

pub(crate) struct App {
    config: Config,
    session: Arc<SessionContext>,
    backend: Arc<HttpBackend>,
    client: Arc<BlockClient>,
    wallet: Option<Arc<dyn Wallet>>,
}

impl App {
    pub(crate) fn setup(config: Config) -> anyhow::Result<Self> {
        let session = Arc::new(SessionContext::load(&config.session_file)?);
        let backend = Arc::new(HttpBackend::new(&config.backend, session.clone())?);
        let client = Arc::new(BlockClient::setup(&config)?);

        let wallet: Option<Arc<dyn Wallet>> = match &config.wallet.secret_file {
            Some(file) => {
                let secret = std::fs::read_to_string(file).with_context(|| format!("read wallet key {}", file))?;
                let (key, address) = extract_keypair_from_str(&secret)?;
                let approval: Box<dyn Approval> = if config.wallet.auto_approve {
                    Box::new(AutoApprove)
                } else {
                    Box::new(TerminalApproval)
                };
                debug!("wallet {} connected", checksum_address(&address));
                Some(Arc::new(LocalWallet::new(&client, config.chain_id()?, key, approval)))
            }
            None => None,
        };

        Ok(Self {
            config,
            session,
            backend,
            client,
            wallet,
        })
    }

    fn guard(&self) -> Arc<SessionGuard> {
        Arc::new(SessionGuard::new(
            self.session.clone(),
            self.backend.clone(),
            self.wallet.clone(),
        ))
    }

    fn wallet(&self) -> anyhow::Result<&Arc<dyn Wallet>> {
        self.wallet.as_ref().ok_or_else(|| Error::WalletNotConnected.into())
    }

    async fn post_pair(&self, thread: u64, question: u64, answer: u64) -> anyhow::Result<(Post, Post)> {
        let thread = self.backend.thread(thread).await?;
        let q = thread
            .question(question)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("question {} in thread {}", question, thread.thread_id)))?;
        let a = thread
            .answer(answer)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("answer {} in thread {}", answer, thread.thread_id)))?;
        Ok((q, a))
    }

    /// Runs a policy with a fresh coordinator; Ctrl-C tears the coordinator down.
    async fn act(&self, policy: &dyn ActionPolicy, on_chain: bool) -> anyhow::Result<()> {
        if on_chain {
            self.client.check_chain(&self.config).await?;
        }
        let ctx = ActionContext {
            backend: self.backend.clone(),
            guard: self.guard(),
            wallet: self.wallet.clone(),
            contract: FactHoundContract::new(self.config.contract_address()?)?,
        };
        let chain = Arc::new(Web3Chain::new(
            self.client.clone(),
            self.wallet.clone(),
            self.config.poll_interval(),
        ));
        let coordinator = Arc::new(Coordinator::new(chain, self.backend.clone(), self.config.chain.explorer.clone()));

        let mut rx = coordinator.subscribe();
        let explorer = self.config.chain.explorer.clone();
        let renderer = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                render(&state, &explorer);
            }
        });
        let interrupt = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted, no longer watching the transaction");
                    coordinator.teardown();
                }
            }
        });

        let outcome = policy.execute(&ctx, &coordinator).await;
        interrupt.abort();
        renderer.abort();
        let outcome = outcome?;

        match &outcome {
            ActionOutcome::OnChain(TransactionState::Error { detail, .. }) => Err(anyhow!("{}", detail)),
            ActionOutcome::OnChain(state) if state.is_idle() && coordinator.is_torn_down() => {
                println!("cancelled");
                Ok(())
            }
            ActionOutcome::OnChain(TransactionState::Success { tx }) => {
                println!("success: {}", explorer_tx_url(&self.config.chain.explorer, tx));
                Ok(())
            }
            other => {
                println!("{}", other);
                Ok(())
            }
        }
    }

    pub(crate) async fn dispatch(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Register {
                username,
                email,
                password,
            } => {
                self.backend.register(&username, &email, &password).await?;
                println!("registered {}, you can log in now", username);
            }
            Commands::Login { username, password } => {
                self.backend.login(&username, &password).await?;
                println!("logged in as {}", username);
            }
            Commands::LoginSiwe => {
                let wallet = self.wallet()?;
                let address = wallet.account().ok_or(Error::WalletNotConnected)?;
                let base = Url::parse(self.backend.base_url()).context("backend url")?;
                let domain = base.host_str().unwrap_or("localhost").to_string();
                let nonce = self.backend.siwe_nonce().await?;
                let message = siwe_message(
                    &domain,
                    base.as_str(),
                    &address,
                    self.config.chain_id()?,
                    &nonce,
                    chrono::Utc::now(),
                );
                let signature = wallet.sign_message(&message)?;
                self.backend.siwe_login(message, signature).await?;
                println!("logged in as {}", checksum_address(&address));
            }
            Commands::Logout => {
                self.session.clear();
                if let Some(wallet) = &self.wallet {
                    wallet.disconnect();
                }
                println!("logged out");
            }
            Commands::Whoami => {
                let me = self.guard().ensure_valid().await?;
                println!(
                    "{} {}",
                    me.username.as_deref().unwrap_or("-"),
                    me.wallet.as_deref().unwrap_or("")
                );
            }
            Commands::Thread { id } => print_thread(&self.backend.thread(id).await?),
            Commands::History { user } => {
                let history = self.backend.user_history(user).await?;
                println!("{} ({})", history.username.as_deref().unwrap_or("-"), history.userid);
                for post in history.questions.iter().chain(&history.answers) {
                    println!("  {}", post);
                }
            }
            Commands::Ask {
                topic,
                text,
                tags,
                bounty,
            } => {
                let bounty = parse_ether(&bounty)?;
                let on_chain = !bounty.is_zero();
                let policy = CreateQuestion {
                    topic,
                    text,
                    tags,
                    bounty,
                };
                self.act(&policy, on_chain).await?;
            }
            Commands::Reply { thread, text } => self.act(&PostReply { thread, text }, false).await?,
            Commands::Answer { thread, question, text } => {
                let view = self.backend.thread(thread).await?;
                let question = view
                    .question(question)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("question {} in thread {}", question, thread)))?;
                let on_chain = question.question_hash()?.is_some();
                self.act(&SubmitAnswer { thread, question, text }, on_chain)
                    .await?;
            }
            Commands::Select {
                thread,
                question,
                answer,
            } => {
                let (question, answer) = self.post_pair(thread, question, answer).await?;
                let on_chain = question.question_hash()?.is_some() && answer.answer_hash()?.is_some();
                self.act(&SelectAnswer { question, answer }, on_chain).await?;
            }
            Commands::Redeem {
                thread,
                question,
                answer,
            } => {
                let (question, answer) = self.post_pair(thread, question, answer).await?;
                self.act(&RedeemBounty { question, answer }, true).await?;
            }
            Commands::ShowConfig => Config::show(),
        }
        Ok(())
    }
}
