use async_trait::async_trait;
use mudproto::event::Event;

use super::{Command, Invocation, Refusal};
use crate::entities::object;
use crate::hub;

pub struct Say;

#[async_trait]
impl Command for Say {
    fn keys(&self) -> &'static [(&'static str, usize)] {
        &[("say", 1)]
    }

    fn priority(&self) -> i32 {
        5
    }

    fn help_category(&self) -> &'static str {
        "social"
    }

    fn help(&self) -> &'static str {
        "say <message>: speak to everyone in the room."
    }

    async fn run(&self, inv: &Invocation<'_>) -> anyhow::Result<()> {
        if inv.args.is_empty() {
            return Err(Refusal::new("Say what?").into());
        }
        let Some(room) = object::container_of(inv.ctx, inv.caller).await? else {
            return Err(Refusal::new("There is nobody to hear you.").into());
        };
        let name = inv.caller.behavior().display_name(inv.caller).await?;
        let speaker = object::session_of(inv.caller)
            .await?
            .and_then(|doc| hub::session_of(&doc));

        inv.ctx
            .hub()
            .send_room(
                room.id().as_str(),
                speaker,
                Event::text(format!("{name} says, \"{}\"", inv.args)),
            )
            .await;
        inv.reply(format!("You say, \"{}\"", inv.args)).await
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::execute;
    use crate::testutil;

    #[tokio::test]
    async fn say_reaches_the_room_but_not_the_speaker_twice() {
        let (_fake, ctx) = testutil::engine().await;
        let mut ann = testutil::playing(&ctx, "Ann", "Zed").await;
        let mut bob = testutil::playing(&ctx, "Bob", "Yan").await;

        execute(&ctx, &ann.character, "say  hello there ").await.unwrap();
        assert_eq!(ann.next_text().await, "You say, \"hello there\"");
        assert_eq!(bob.next_text().await, "Zed says, \"hello there\"");
        assert!(ann.try_text().is_none());
    }
}
