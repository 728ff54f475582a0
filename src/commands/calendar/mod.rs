use anyhow::Context as _;
use chrono::{DateTime, Duration, Utc};
use chrono_english::{parse_date_string, Dialect};
use chrono_tz::Tz;
use log::warn;
use poise::serenity_prelude::CreateMessage;
use poise::CreateReply;

use crate::auth::token::TokenBlob;
use crate::auth::Resolution;
use crate::bot::CommandContext;
use crate::calendar::{Event, EventTime, NewEvent};

const MAX_EVENTS: u32 = 10;
const DEFAULT_DURATION_MINUTES: u32 = 60;

const NOT_CONNECTED: &str =
    "You haven't connected your Google Calendar yet! Please use the /connect command.";
const NEEDS_REAUTH: &str =
    "Your Google Calendar connection has expired. Please use /connect to link it again.";

async fn say(ctx: CommandContext<'_>, text: impl Into<String>) -> Result<(), anyhow::Error> {
    ctx.send(CreateReply::default().ephemeral(true).content(text))
        .await?;
    Ok(())
}

/// Resolve the caller's credential, replying with guidance when there is
/// nothing usable. Store or provider faults bubble up to the error hook.
async fn credential_or_prompt(
    ctx: CommandContext<'_>,
) -> Result<Option<TokenBlob>, anyhow::Error> {
    match ctx.data().resolver.resolve(ctx.author().id.get()).await? {
        Resolution::Usable(credential) => Ok(Some(credential)),
        Resolution::NotConnected => {
            say(ctx, NOT_CONNECTED).await?;
            Ok(None)
        }
        Resolution::NeedsReauth => {
            say(ctx, NEEDS_REAUTH).await?;
            Ok(None)
        }
    }
}

#[poise::command(slash_command)]
/// Connect your Google Calendar to the bot.
pub async fn connect(ctx: CommandContext<'_>) -> Result<(), anyhow::Error> {
    let auth_url = format!(
        "{}/connect_google?user_id={}",
        ctx.data().config.web.base_url,
        ctx.author().id.get()
    );

    let dm = ctx
        .author()
        .direct_message(
            ctx.serenity_context(),
            CreateMessage::new().content(format!(
                "Please use this link to connect your Google Calendar: {auth_url}"
            )),
        )
        .await;

    match dm {
        Ok(_) => say(ctx, "I've sent you a private message with your connection link.").await,
        Err(err) => {
            // dms closed by privacy settings; the link stays private
            // either way since the reply is ephemeral
            warn!("could not DM user {}: {err}", ctx.author().id);
            say(
                ctx,
                "I couldn't send you a DM. Please check your server privacy settings.",
            )
            .await
        }
    }
}

#[poise::command(slash_command)]
/// Shows your next 10 upcoming Google Calendar events.
pub async fn events(ctx: CommandContext<'_>) -> Result<(), anyhow::Error> {
    ctx.defer_ephemeral().await?;

    let Some(credential) = credential_or_prompt(ctx).await? else {
        return Ok(());
    };

    let events = ctx
        .data()
        .calendar
        .upcoming(&credential.access_token, MAX_EVENTS)
        .await
        .context("failed to fetch upcoming events")?;

    if events.is_empty() {
        return say(ctx, "You have no upcoming events found.").await;
    }

    say(ctx, render_events(&events)).await
}

#[poise::command(slash_command)]
/// Add an event to your Google Calendar.
pub async fn addevent(
    ctx: CommandContext<'_>,
    #[description = "Name of the event"] name: String,
    #[description = "When it starts, e.g. \"tomorrow at 9am\""] when: String,
    #[description = "Duration in minutes (default 60)"]
    #[min = 1]
    #[max = 1440]
    duration_minutes: Option<u32>,
) -> Result<(), anyhow::Error> {
    ctx.defer_ephemeral().await?;

    let timezone = ctx.data().config.calendar.timezone;
    let Some(start) = parse_when(&when, Utc::now().with_timezone(&timezone)) else {
        return say(
            ctx,
            format!(
                "I couldn't understand \"{when}\" as a point in time. \
                 Try something like \"tomorrow at 9am\" or \"friday 14:30\"."
            ),
        )
        .await;
    };

    let Some(credential) = credential_or_prompt(ctx).await? else {
        return Ok(());
    };

    let duration = duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
    let event = build_event(name, start.with_timezone(&Utc), duration, timezone);
    let created = ctx
        .data()
        .calendar
        .insert(&credential.access_token, &event)
        .await
        .context("failed to insert event")?;

    let mut reply = format!(
        "Created **{}** on <t:{}:F> ({duration} minutes).",
        event.summary,
        start.timestamp()
    );
    if let Some(link) = created.html_link {
        reply += &format!("\n{link}");
    }
    say(ctx, reply).await
}

/// "string in, timestamp out"; anything the parser rejects is treated as
/// a normal miss, never an error.
fn parse_when(input: &str, now: DateTime<Tz>) -> Option<DateTime<Tz>> {
    parse_date_string(input, now.clone(), Dialect::Us)
        // the parser stumbles over the filler word in "tomorrow at 9am"
        .or_else(|_| parse_date_string(&input.replace(" at ", " "), now, Dialect::Us))
        .ok()
}

fn build_event(summary: String, start: DateTime<Utc>, duration_minutes: u32, tz: Tz) -> NewEvent {
    let end = start + Duration::minutes(i64::from(duration_minutes));
    NewEvent {
        summary,
        start: EventTime::timed(start, tz.name()),
        end: EventTime::timed(end, tz.name()),
    }
}

fn render_events(events: &[Event]) -> String {
    let mut out = String::from("📅 **Your upcoming events:**\n\n");

    for event in events {
        let summary = event.summary.as_deref().unwrap_or("(untitled)");
        match (&event.start.date_time, &event.start.date) {
            (Some(at), _) => {
                out += &format!("**- {}** on <t:{}:F>\n", summary, at.timestamp());
            }
            (None, Some(day)) => {
                out += &format!("**- {}** on {} (all day)\n", summary, day.format("%A, %B %d"));
            }
            (None, None) => {
                out += &format!("**- {}**\n", summary);
            }
        }
    }

    out
}
