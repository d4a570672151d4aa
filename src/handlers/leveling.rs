//! Message activity and leveling commands.

use super::{Bot, Command, Context, HandlerResult};
use crate::db::{Board, ChannelMode, ResetScope, XpChange};
use crate::ids::{ChannelId, GuildId, RoleId, UserId, mention, role_mention};
use crate::leveling::Activity;

impl Bot {
    pub(super) async fn on_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        roles: Option<Vec<RoleId>>,
        now: i64,
    ) -> HandlerResult {
        let activity = Activity {
            guild_id,
            channel_id,
            user_id,
            roles,
            now,
        };
        let (_, effects) = self.leveling.award_activity(&activity).await?;
        Ok(effects)
    }

    pub(super) async fn leveling_command(&self, ctx: &Context, command: Command) -> HandlerResult {
        let guild_id = ctx.guild_id;
        let engine = &self.leveling;

        match command {
            Command::Rank { user_id } => {
                let user_id = user_id.unwrap_or(ctx.actor.user_id);
                let rank = engine.rank(guild_id, user_id).await?;
                let position = rank
                    .position
                    .map_or_else(|| "unranked".to_string(), |p| format!("#{}", p));
                let next = rank
                    .xp_to_next
                    .map_or_else(|| "max level".to_string(), |xp| format!("{} XP to next level", xp));
                let mut text = format!(
                    "{}: level {} ({} XP, {}), {}. This week {} XP, this month {} XP, {} messages.",
                    mention(user_id),
                    rank.level,
                    rank.xp,
                    position,
                    next,
                    rank.weekly_xp,
                    rank.monthly_xp,
                    rank.total_messages
                );
                if !rank.badges.is_empty() {
                    text.push_str(&format!(" Badges: {}.", rank.badges.join(", ")));
                }
                Ok(vec![ctx.reply(text)])
            }

            Command::Leaderboard { board, limit } => {
                let records = engine.leaderboard(guild_id, board, limit).await?;
                if records.is_empty() {
                    return Ok(vec![ctx.reply("Nobody has earned XP yet.")]);
                }
                let lines: Vec<String> = records
                    .iter()
                    .enumerate()
                    .map(|(i, r)| {
                        let xp = match board {
                            Board::Total => r.xp,
                            Board::Weekly => r.weekly_xp,
                            Board::Monthly => r.monthly_xp,
                        };
                        format!("{}. {} level {} ({} XP)", i + 1, mention(r.user_id), r.level, xp)
                    })
                    .collect();
                Ok(vec![ctx.reply(format!("Leaderboard:\n{}", lines.join("\n")))])
            }

            Command::SetXp { user_id, xp } => {
                ctx.require_admin()?;
                let (change, mut effects) = engine.set_xp(guild_id, user_id, xp, ctx.channel_id).await?;
                effects.insert(0, ctx.reply(xp_summary(&change)));
                Ok(effects)
            }

            Command::AddXp { user_id, xp } => {
                ctx.require_admin()?;
                let (change, mut effects) = engine.add_xp(guild_id, user_id, xp, ctx.channel_id).await?;
                effects.insert(0, ctx.reply(xp_summary(&change)));
                Ok(effects)
            }

            Command::SetLevel { user_id, level } => {
                ctx.require_admin()?;
                let (change, mut effects) = engine
                    .set_level(guild_id, user_id, level, ctx.channel_id)
                    .await?;
                effects.insert(0, ctx.reply(xp_summary(&change)));
                Ok(effects)
            }

            Command::Badge { user_id, badge } => {
                ctx.require_admin()?;
                let now = chrono::Utc::now().timestamp();
                let text = if engine.award_badge(guild_id, user_id, &badge, now).await? {
                    format!("{} received the {} badge.", mention(user_id), badge.trim())
                } else {
                    format!("{} already has the {} badge.", mention(user_id), badge.trim())
                };
                Ok(vec![ctx.reply(text)])
            }

            Command::XpRate { value } => {
                ctx.require_admin()?;
                engine.set_xp_rate(guild_id, value).await?;
                Ok(vec![ctx.reply(format!("Messages now earn {} XP.", value))])
            }

            Command::XpCooldown { seconds } => {
                ctx.require_admin()?;
                engine.set_cooldown(guild_id, seconds).await?;
                Ok(vec![ctx.reply(format!("XP cooldown set to {} seconds.", seconds))])
            }

            Command::XpMultiplier { value } => {
                ctx.require_admin()?;
                engine.set_multiplier(guild_id, value).await?;
                Ok(vec![ctx.reply(format!("XP multiplier set to x{}.", value))])
            }

            Command::XpFormula { formula } => {
                ctx.require_admin()?;
                let changed = engine.set_formula(guild_id, formula).await?;
                Ok(vec![ctx.reply(format!(
                    "Level formula set to {}. {} members changed level.",
                    formula, changed
                ))])
            }

            Command::AnnounceChannel { channel_id } => {
                ctx.require_admin()?;
                engine.set_announce_channel(guild_id, channel_id).await?;
                let text = match channel_id {
                    Some(channel) => format!("Level-ups are announced in <#{}>.", channel),
                    None => "Level-ups are announced where they happen.".to_string(),
                };
                Ok(vec![ctx.reply(text)])
            }

            Command::MapRole { level, role_id } => {
                ctx.require_admin()?;
                engine.map_role(guild_id, level, role_id).await?;
                Ok(vec![ctx.reply(format!(
                    "Level {} now grants {}.",
                    level,
                    role_mention(role_id)
                ))])
            }

            Command::UnmapRole { level } => {
                ctx.require_admin()?;
                let text = if engine.unmap_role(guild_id, level).await? {
                    format!("Level {} no longer grants a role.", level)
                } else {
                    format!("Level {} had no role.", level)
                };
                Ok(vec![ctx.reply(text)])
            }

            Command::XpChannel { channel_id, mode } => {
                ctx.require_admin()?;
                engine.set_channel_mode(guild_id, channel_id, mode).await?;
                let state = match mode {
                    Some(ChannelMode::Enabled) => "enabled",
                    Some(ChannelMode::Disabled) => "disabled",
                    None => "cleared",
                };
                Ok(vec![ctx.reply(format!("XP in <#{}>: {}.", channel_id, state))])
            }

            Command::ResetCounters { scope } => {
                ctx.require_admin()?;
                let cleared = engine.reset_counters(scope, Some(guild_id)).await?;
                let window = match scope {
                    ResetScope::Weekly => "Weekly",
                    ResetScope::Monthly => "Monthly",
                };
                Ok(vec![ctx.reply(format!("{} XP reset for {} members.", window, cleared))])
            }

            // Review, economy and bump commands are routed by `on_command`.
            other => {
                tracing::debug!(command = ?other, "Not a leveling command");
                Ok(Vec::new())
            }
        }
    }
}

fn xp_summary(change: &XpChange) -> String {
    format!(
        "{} now has {} XP (level {}).",
        mention(change.record.user_id),
        change.record.xp,
        change.record.level
    )
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::{Command, Event};
    use crate::platform::testing::Call;

    fn message(user_id: u64, channel_id: u64, timestamp: i64) -> Event {
        Event::MessageCreated {
            guild_id: GUILD,
            channel_id,
            user_id,
            roles: None,
            bot: false,
            timestamp: Some(timestamp),
        }
    }

    #[tokio::test]
    async fn messages_award_xp_and_announce_level_up() {
        let h = harness().await;
        h.bot.dispatch(message(5, 100, 0)).await;
        h.bot.dispatch(message(5, 100, 30)).await;
        assert_eq!(h.db.levels().get(GUILD, 5).await.unwrap().unwrap().xp, 25);
        assert!(h.platform.calls().is_empty());

        h.bot.dispatch(message(5, 100, 61)).await;
        assert_eq!(
            h.platform.messages(),
            vec![(100, "<@5> leveled up to level 2.".to_string())]
        );
    }

    #[tokio::test]
    async fn mapped_role_is_granted_on_admin_override() {
        let h = harness().await;
        h.bot
            .dispatch(command(admin(), Command::MapRole { level: 3, role_id: 300 }))
            .await;
        h.bot
            .dispatch(command(admin(), Command::SetLevel { user_id: 5, level: 3 }))
            .await;

        let calls = h.platform.calls();
        assert!(calls.contains(&Call::AddRole(GUILD, 5, 300)));
        assert!(calls.contains(&Call::Send(
            100,
            "<@900> <@5> now has 200 XP (level 3).".to_string()
        )));
    }

    #[tokio::test]
    async fn config_commands_are_admin_only() {
        let h = harness().await;
        h.bot
            .dispatch(command(member(5), Command::XpRate { value: 50 }))
            .await;
        h.bot
            .dispatch(command(admin(), Command::XpRate { value: 5000 }))
            .await;
        let messages = h.platform.messages();
        assert_eq!(messages[0].1, "<@5> You are not allowed to do that.");
        assert_eq!(messages[1].1, "<@900> XP rate out of range: 5000.");
    }

    #[tokio::test]
    async fn rank_reports_position() {
        let h = harness().await;
        h.bot.dispatch(message(5, 100, 0)).await;
        h.bot
            .dispatch(command(member(5), Command::Rank { user_id: None }))
            .await;
        let (_, text) = h.platform.messages().pop().unwrap();
        assert!(text.starts_with("<@5> <@5>: level 1 (25 XP, #1), 25 XP to next level."));
    }
}
