use async_trait::async_trait;

use super::{Command, Invocation, Refusal};
use crate::entities::object;

pub struct Look;

#[async_trait]
impl Command for Look {
    fn keys(&self) -> &'static [(&'static str, usize)] {
        &[("look", 1)]
    }

    fn priority(&self) -> i32 {
        10
    }

    fn help_category(&self) -> &'static str {
        "informative"
    }

    fn help(&self) -> &'static str {
        "look [thing]: describe your surroundings, or something in them."
    }

    async fn run(&self, inv: &Invocation<'_>) -> anyhow::Result<()> {
        let Some(room) = object::container_of(inv.ctx, inv.caller).await? else {
            return Err(Refusal::new("You are nowhere at all.").into());
        };

        if inv.args.is_empty() {
            let text = room
                .behavior()
                .render_appearance(inv.ctx, &room, inv.caller)
                .await?;
            return inv.reply(text).await;
        }

        let wanted = inv.args.to_lowercase();
        for (thing, _) in object::contents(inv.ctx, &room).await? {
            let name = thing.behavior().display_name(&thing).await?;
            if name.to_lowercase().starts_with(&wanted) {
                let text = thing
                    .behavior()
                    .render_appearance(inv.ctx, &thing, inv.caller)
                    .await?;
                return inv.reply(text).await;
            }
        }
        Err(Refusal::new(format!("You see no {} here.", inv.args)).into())
    }
}

pub struct Who;

#[async_trait]
impl Command for Who {
    fn keys(&self) -> &'static [(&'static str, usize)] {
        &[("who", 1)]
    }

    fn help_category(&self) -> &'static str {
        "informative"
    }

    fn help(&self) -> &'static str {
        "who: list everyone in the world."
    }

    async fn run(&self, inv: &Invocation<'_>) -> anyhow::Result<()> {
        let playing = inv
            .ctx
            .hub()
            .online()
            .await
            .into_iter()
            .filter_map(|o| o.character)
            .collect::<Vec<_>>();
        let text = match playing.len() {
            0 => "Nobody is here.".to_string(),
            1 => format!("Playing: {}\r\n1 player.", playing[0]),
            n => format!("Playing: {}\r\n{n} players.", playing.join(", ")),
        };
        inv.reply(text).await
    }
}

pub struct Help;

#[async_trait]
impl Command for Help {
    fn keys(&self) -> &'static [(&'static str, usize)] {
        &[("help", 1), ("?", 1)]
    }

    fn help(&self) -> &'static str {
        "help [command]: list commands, or explain one."
    }

    async fn run(&self, inv: &Invocation<'_>) -> anyhow::Result<()> {
        let commands = inv.ctx.commands();
        if !inv.args.is_empty() {
            let word = inv.args.split_whitespace().next().unwrap_or_default();
            let Some((cmd, _)) = commands.find(inv.caller, word) else {
                return Err(Refusal::new(format!("No help for {word}.")).into());
            };
            return inv.reply(cmd.help()).await;
        }

        let mut by_category = std::collections::BTreeMap::<&str, Vec<&str>>::new();
        for cmd in commands.iter().filter(|c| c.available(inv.caller)) {
            by_category
                .entry(cmd.help_category())
                .or_default()
                .push(cmd.name());
        }
        let mut lines = Vec::new();
        for (category, mut names) in by_category {
            names.sort_unstable();
            lines.push(format!("{category}: {}", names.join(" ")));
        }
        inv.reply(lines.join("\r\n")).await
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::execute;
    use crate::testutil;

    #[tokio::test]
    async fn look_describes_the_room_and_who_is_in_it() {
        let (_fake, ctx) = testutil::engine().await;
        let mut ann = testutil::playing(&ctx, "Ann", "Zed").await;
        let _bob = testutil::playing(&ctx, "Bob", "Yan").await;

        execute(&ctx, &ann.character, "look").await.unwrap();
        let text = ann.next_text().await;
        assert!(text.starts_with("The Hearth\r\n"));
        assert!(text.contains("Also here: Yan."));
        assert!(!text.contains("Zed"));

        execute(&ctx, &ann.character, "l ya").await.unwrap();
        assert!(ann.next_text().await.starts_with("Yan\r\n"));

        execute(&ctx, &ann.character, "look dragon").await.unwrap();
        assert_eq!(ann.next_text().await, "You see no dragon here.");
    }

    #[tokio::test]
    async fn who_and_help_list_what_they_know() {
        let (_fake, ctx) = testutil::engine().await;
        let mut ann = testutil::playing(&ctx, "Ann", "Zed").await;

        execute(&ctx, &ann.character, "who").await.unwrap();
        assert_eq!(ann.next_text().await, "Playing: Zed\r\n1 player.");

        execute(&ctx, &ann.character, "help").await.unwrap();
        let text = ann.next_text().await;
        assert!(text.contains("informative: look who"));
        assert!(text.contains("social: say"));

        execute(&ctx, &ann.character, "help sa").await.unwrap();
        assert!(ann.next_text().await.starts_with("say <message>"));
        execute(&ctx, &ann.character, "? nothing").await.unwrap();
        assert_eq!(ann.next_text().await, "No help for nothing.");
    }
}
