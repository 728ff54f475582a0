use crate::bot::CommandContext;

pub mod calendar;

#[poise::command(prefix_command, owners_only)]
/// Pushes the slash commands to discord. Owner only.
pub async fn register(ctx: CommandContext<'_>) -> Result<(), anyhow::Error> {
    poise::builtins::register_application_commands_buttons(ctx).await?;
    Ok(())
}
