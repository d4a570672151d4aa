//! Bump confirmations and the bump leaderboard.

use super::{Bot, Context, HandlerResult};
use crate::ids::{ChannelId, GuildId, UserId, mention};

impl Bot {
    pub(super) async fn on_bump(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        now: i64,
    ) -> HandlerResult {
        let (_, effects) = self.bumps.record_bump(guild_id, channel_id, user_id, now).await?;
        Ok(effects)
    }

    pub(super) async fn bump_leaderboard(&self, ctx: &Context, limit: u32) -> HandlerResult {
        let top = self.bumps.leaderboard(ctx.guild_id, limit).await?;
        if top.is_empty() {
            return Ok(vec![ctx.reply("Nobody has bumped the server yet.")]);
        }
        let lines: Vec<String> = top
            .iter()
            .enumerate()
            .map(|(i, (user_id, count))| format!("{}. {} ({} bumps)", i + 1, mention(*user_id), count))
            .collect();
        Ok(vec![ctx.reply(format!("Top bumpers:\n{}", lines.join("\n")))])
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::{Command, Event};
    use crate::scheduler::TaskKey;

    fn bump(user_id: u64, timestamp: i64) -> Event {
        Event::BumpSucceeded {
            guild_id: GUILD,
            channel_id: 50,
            user_id,
            timestamp: Some(timestamp),
        }
    }

    #[tokio::test]
    async fn bumps_thank_and_keep_one_reminder() {
        let h = harness().await;
        h.bot.dispatch(bump(5, 100)).await;
        h.bot.dispatch(bump(6, 200)).await;

        let messages = h.platform.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].1.starts_with("Thanks for bumping, <@6>!"));
        assert!(h.applier.scheduler().is_pending(&TaskKey::BumpReminder(GUILD)));
        assert_eq!(h.applier.scheduler().len(), 1);

        h.bot
            .dispatch(command(member(7), Command::BumpLeaderboard { limit: 5 }))
            .await;
        let (_, text) = h.platform.messages().pop().unwrap();
        assert_eq!(text, "<@7> Top bumpers:\n1. <@5> (1 bumps)\n2. <@6> (1 bumps)");
    }
}
