use async_trait::async_trait;
use mudproto::event::Event;

use crate::commands::Refusal;
use crate::entities::{Handle, user};
use crate::session::parser::{ParserCx, SessionParser};

const OPTIONS: &str = "play <name> | create <name> | logout";

/// Character select, after login and before play.
#[derive(Default)]
pub struct MainMenu;

pub fn main_menu() -> Box<dyn SessionParser> {
    Box::new(MainMenu)
}

fn signed_in<'a>(cx: &ParserCx<'a>) -> anyhow::Result<&'a Handle> {
    cx.user()
        .ok_or_else(|| anyhow::anyhow!("main menu reached without a user"))
}

impl MainMenu {
    async fn render(&self, cx: &ParserCx<'_>) -> anyhow::Result<()> {
        let u = signed_in(cx)?;
        let chars = user::characters(cx.ctx(), u).await?;
        if chars.is_empty() {
            cx.send_text("You have no characters yet.").await;
        } else {
            let mut rows = Vec::with_capacity(chars.len());
            for c in &chars {
                rows.push(vec![c.behavior().display_name(c).await?]);
            }
            cx.send(Event::Table {
                title: "Your characters".to_string(),
                columns: vec!["Name".to_string()],
                rows,
            })
            .await;
        }
        cx.send_text(OPTIONS).await;
        Ok(())
    }

    async fn play(&self, cx: &mut ParserCx<'_>, name: &str) -> anyhow::Result<()> {
        let u = signed_in(cx)?;
        let wanted = name.to_lowercase();
        for c in user::characters(cx.ctx(), u).await? {
            if c.behavior().display_name(&c).await?.to_lowercase() == wanted {
                cx.close();
                cx.play(c);
                return Ok(());
            }
        }
        Err(Refusal::new(format!("You have no character named {name}.")).into())
    }
}

#[async_trait]
impl SessionParser for MainMenu {
    fn name(&self) -> &'static str {
        "main_menu"
    }

    async fn on_start(&mut self, cx: &mut ParserCx<'_>) -> anyhow::Result<()> {
        self.render(cx).await
    }

    async fn parse(&mut self, cx: &mut ParserCx<'_>, line: &str) -> anyhow::Result<()> {
        let line = line.trim();
        let (word, args) = match line.split_once(char::is_whitespace) {
            Some((w, rest)) => (w, rest.trim()),
            None => (line, ""),
        };
        match (word.to_lowercase().as_str(), args) {
            ("", _) => self.render(cx).await,
            ("play" | "create", "") => Err(Refusal::new(format!("{word} whom?")).into()),
            ("play", name) => self.play(cx, name).await,
            ("create", name) => {
                let u = signed_in(cx)?;
                let c = user::create_character(cx.ctx(), u, name).await?;
                let shown = c.behavior().display_name(&c).await?;
                cx.send_text(format!("{shown} is ready to play.")).await;
                self.render(cx).await
            }
            ("logout", _) => {
                cx.send_text("Logged out.").await;
                cx.close();
                cx.logout();
                Ok(())
            }
            _ => {
                cx.send_text(format!("Unknown option. {OPTIONS}")).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mudproto::event::Event;
    use serde_json::json;

    use crate::testutil::{self, Probe};

    #[tokio::test]
    async fn create_then_play_hands_input_to_the_character() {
        let (fake, ctx) = testutil::engine().await;
        let mut p = Probe::connect(&ctx).await;
        p.sign_in("Ann", "pw-pw-pw").await;
        assert!(p.texts().iter().any(|t| t == "You have no characters yet."));

        p.line("create").await;
        assert_eq!(p.last_text(), "create whom?");
        p.line("create zed").await;
        assert!(p.texts().iter().any(|t| t == "Zed is ready to play."));
        let tables = p
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Table { rows, .. } if rows == &vec![vec!["Zed".to_string()]]))
            .count();
        assert_eq!(tables, 1);

        p.line("play nobody").await;
        assert_eq!(p.last_text(), "You have no character named nobody.");

        p.line("play ZED").await;
        assert!(p.conn.stack().is_empty());
        let character = p.conn.state().character.clone().unwrap();
        let stored = fake.doc(character.id().as_str()).unwrap();
        assert_eq!(stored["pending_commands"], json!(["look"]));
        assert_eq!(stored["session"], json!(p.conn.state().handle.id().as_str()));

        // With no parser left the line becomes a command for the character.
        p.line("say hello").await;
        let stored = fake.doc(character.id().as_str()).unwrap();
        assert_eq!(stored["pending_commands"], json!(["look", "say hello"]));
    }

    #[tokio::test]
    async fn logout_returns_to_login() {
        let (fake, ctx) = testutil::engine().await;
        let mut p = Probe::connect(&ctx).await;
        p.sign_in("Ann", "pw-pw-pw").await;
        let session = p.conn.state().handle.id().to_string();
        assert!(fake.doc(&session).unwrap()["user"].is_string());

        p.line("logout").await;
        assert_eq!(p.conn.stack().names(), vec!["login"]);
        assert!(p.conn.state().user.is_none());
        assert!(fake.doc(&session).unwrap().get("user").is_none());
        assert_eq!(p.last_text(), "Enter Username:");
    }
}
