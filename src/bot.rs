use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{error, info};
use poise::serenity_prelude::{ClientBuilder, GatewayIntents};
use poise::CreateReply;
use tokio::signal;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::auth::google::{AuthClient, GoogleAuth};
use crate::auth::store::{MemoryTokenStore, PgTokenStore, TokenStore};
use crate::auth::Resolver;
use crate::calendar::CalendarClient;
use crate::cfg::{Config, StorageBackend};
use crate::commands;
use crate::web::state::StateSigner;
use crate::web::{self, WebContext};

pub type CommandContext<'a> = poise::Context<'a, Arc<Data>, anyhow::Error>;

// User data, which is stored and accessible in all command invocations
pub struct Data {
    pub config: Arc<Config>,
    pub resolver: Resolver,
    pub calendar: CalendarClient,
}

pub struct Bot {
    pub data: Arc<Data>,
    web: Arc<WebContext>,
    pub shutdown: Receiver<()>,
    shutdown_send: Sender<()>,
}

/// Sends a message through `shutdown_send` when a stop signal is detected.
/// Used to start the bot stop sequence.
async fn wait_for_stop_signal(bot: Arc<Bot>) -> Result<(), anyhow::Error> {
    let mut shutdown = bot.shutdown.resubscribe();
    tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => {
                    bot.shutdown_send
                        .send(())
                        .context("failed to send a shutdown signal")?;
                    Ok(())
                }
                Err(err) => Err(anyhow::anyhow!(err)),
            }
        },
        _ = shutdown.recv() => { Ok(()) }
    }
}

async fn on_error(error: poise::FrameworkError<'_, Arc<Data>, anyhow::Error>) {
    match error {
        poise::FrameworkError::Setup { error, .. } => panic!("Failed to start bot: {:?}", error),
        poise::FrameworkError::Command { error, ctx, .. } => {
            // full detail stays in the logs; the user gets an apology
            error!("Error in command `{}`: {:?}", ctx.command().name, error);
            let f = CreateReply::default().ephemeral(true).content(
                "Something went wrong while talking to Google Calendar. Please try again later.",
            );
            std::mem::drop(ctx.send(f).await);
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}

impl Bot {
    pub async fn new(config: Arc<Config>) -> Result<Arc<Self>, anyhow::Error> {
        // Theses signals are used to stop the many tasks trigered.
        // this is called by the task listening for a stop signal.
        let (shutdown_send, shutdown) = tokio::sync::broadcast::channel(1);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.calendar.http_timeout_secs))
            .build()
            .context("failed to build the http client")?;

        let store: Arc<dyn TokenStore> = match config.storage.backend {
            StorageBackend::Postgres => {
                let url = config
                    .storage
                    .url
                    .as_deref()
                    .context("storage.url is required for the postgres backend")?;
                let store = PgTokenStore::connect(url)
                    .await
                    .context("failed to connect to the token database")?;
                store.init().await.context("failed to initialize the token schema")?;
                info!("token store ready (postgres)");
                Arc::new(store)
            }
            StorageBackend::Memory => {
                info!("token store ready (memory, credentials are lost on restart)");
                Arc::new(MemoryTokenStore::default())
            }
        };

        let oauth: Arc<dyn AuthClient> = Arc::new(GoogleAuth::new(
            config.google.client_id.clone(),
            config.google.client_secret.clone(),
            http.clone(),
        ));

        let data = Arc::new(Data {
            config: config.clone(),
            resolver: Resolver::new(store.clone(), oauth.clone()),
            calendar: CalendarClient::new(http),
        });

        let web = Arc::new(WebContext {
            store,
            oauth,
            signer: StateSigner::new(&config.web.state_secret),
            base_url: config.web.base_url.clone(),
        });

        Ok(Arc::new(Self {
            data,
            web,
            shutdown,
            shutdown_send,
        }))
    }

    pub async fn start(self: Arc<Self>) -> Result<(), anyhow::Error> {
        let mut shutdown = self.shutdown.resubscribe();
        let mut tasks = FuturesUnordered::new();

        let options = poise::FrameworkOptions {
            commands: vec![
                commands::register(),
                commands::calendar::connect(),
                commands::calendar::events(),
                commands::calendar::addevent(),
            ],
            on_error: |error| Box::pin(on_error(error)),
            ..Default::default()
        };
        let data = self.data.clone();
        let framework = poise::Framework::builder()
            .options(options)
            .setup(move |ctx, _ready, framework| {
                Box::pin(async move {
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                    Ok(data)
                })
            })
            .build();
        let client = ClientBuilder::new(
            self.data.config.discord.token.clone(),
            GatewayIntents::non_privileged(),
        )
        .framework(framework);

        let mut client = client.await.context("failed to create the discord client")?;

        tasks.push(tokio::spawn(async move {
            // wait until the bot terminates or a shutdown signal is received.
            tokio::select! {
                result = client.start_autosharded() => {
                    if let Err(err) = result {
                        error!("Client error: {}", err);
                    }
                },
                _ = shutdown.recv() => {
                    // shutdown the bot properly
                    client.shard_manager.shutdown_all().await;
                }
            };
        }));

        let web_ctx = self.web.clone();
        let listen = self.data.config.web.listen.clone();
        let web_shutdown = self.shutdown.resubscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = serve_web(web_ctx, &listen, web_shutdown).await {
                error!("Web listener error: {:?}", err);
            }
        }));

        let self_clone = self.clone();
        tasks.push(tokio::spawn(async {
            let _ = wait_for_stop_signal(self_clone).await;
        }));

        // wait for a task to finish.
        let task = tasks
            .next()
            .await
            .context("no tasks started, illegal state")?
            .context("failed to join task");

        // when a task is finished, we must terminate all the others,
        // hence we send a signal talling all tasks to stop processing
        // and return.
        self.shutdown_send.send(())?;

        while let Some(operation) = tasks.next().await {
            operation.context("failed to join task")?;
        }

        task?;
        Ok(())
    }
}

/// The OAuth redirect listener. Runs alongside the gateway client; the
/// credentials it stores become visible to commands through the shared
/// token store.
async fn serve_web(
    ctx: Arc<WebContext>,
    listen: &str,
    mut shutdown: Receiver<()>,
) -> Result<(), anyhow::Error> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind the web listener on {listen}"))?;
    info!("oauth redirect listener on {listen}");

    axum::serve(listener, web::router(ctx))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .context("web server error")
}
