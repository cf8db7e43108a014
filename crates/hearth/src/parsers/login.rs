use async_trait::async_trait;
use zeroize::Zeroize;

use crate::commands::Refusal;
use crate::entities::{Handle, user};
use crate::session::parser::{ParserCx, SessionParser};

const WHITESPACE: &str = "Passwords may not contain leading or trailing whitespace.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Username,
    UsernameConfirm,
    WelcomePassword,
    NewPassword,
    PasswordConfirm,
}

/// Account selection: sign in to an existing user or create a new one.
pub struct LoginParser {
    state: LoginState,
    username: Option<String>,
    password: Option<String>,
    user: Option<Handle>,
}

impl Default for LoginParser {
    fn default() -> Self {
        Self {
            state: LoginState::Username,
            username: None,
            password: None,
            user: None,
        }
    }
}

impl Drop for LoginParser {
    fn drop(&mut self) {
        self.forget_password();
    }
}

pub fn login_parser() -> Box<dyn SessionParser> {
    Box::new(LoginParser::default())
}

impl LoginParser {
    pub fn state(&self) -> LoginState {
        self.state
    }

    fn forget_password(&mut self) {
        if let Some(mut pw) = self.password.take() {
            pw.zeroize();
        }
    }

    fn clear(&mut self) {
        self.state = LoginState::Username;
        self.username = None;
        self.user = None;
        self.forget_password();
    }

    async fn render(&self, cx: &ParserCx<'_>) {
        let name = self.username.as_deref().unwrap_or("");
        let prompt = match self.state {
            LoginState::Username => "Enter Username:".to_string(),
            LoginState::UsernameConfirm => {
                format!("You want your Username to be: {name}\r\nYes or No (or return):")
            }
            LoginState::WelcomePassword => "Password (or return):".to_string(),
            LoginState::NewPassword => {
                format!("Let's set a good password for {name}.\r\nPassword (or return):")
            }
            LoginState::PasswordConfirm => {
                "Enter the password one more time to confirm.\r\nPassword (or return):".to_string()
            }
        };
        cx.send_text(prompt).await;
    }

    async fn handle_username(&mut self, cx: &mut ParserCx<'_>, text: &str) -> anyhow::Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.username = Some(text.to_string());
        self.user = user::find_user(cx.ctx(), text).await?;
        self.state = if self.user.is_some() {
            LoginState::WelcomePassword
        } else {
            LoginState::UsernameConfirm
        };
        Ok(())
    }

    fn handle_username_confirm(&mut self, text: &str) {
        match text.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" => self.state = LoginState::NewPassword,
            "no" | "n" => self.clear(),
            _ => {}
        }
    }

    async fn handle_welcome_password(&mut self, cx: &mut ParserCx<'_>, text: &str) -> anyhow::Result<()> {
        if text.trim() != text {
            cx.send_text(WHITESPACE).await;
            return Ok(());
        }
        let Some(u) = self.user.clone() else {
            self.clear();
            return Ok(());
        };
        if user::authenticate(&u, text).await? {
            self.finish(cx, u);
        } else {
            cx.send_text("Invalid credentials. Please try again. (or return)").await;
        }
        Ok(())
    }

    async fn handle_new_password(&mut self, cx: &mut ParserCx<'_>, text: &str) {
        if text.trim() != text || text.is_empty() {
            cx.send_text(WHITESPACE).await;
            return;
        }
        self.forget_password();
        self.password = Some(text.to_string());
        self.state = LoginState::PasswordConfirm;
    }

    async fn handle_password_confirm(&mut self, cx: &mut ParserCx<'_>, text: &str) -> anyhow::Result<()> {
        if text.trim() != text {
            cx.send_text(WHITESPACE).await;
            return Ok(());
        }
        if self.password.as_deref() != Some(text) {
            cx.send_text("Passwords don't match, try again.").await;
            self.forget_password();
            self.state = LoginState::NewPassword;
            return Ok(());
        }

        let name = self.username.clone().unwrap_or_default();
        let created = match self.password.as_deref() {
            Some(pw) => user::create_user(cx.ctx(), &name, pw).await,
            None => Err(anyhow::anyhow!("password vanished before account creation")),
        };
        self.forget_password();
        match created {
            Ok((u, first)) => {
                if first {
                    cx.send_text("FIRST USER TO BE CREATED. THIS USER IS A SUPERUSER.").await;
                }
                self.finish(cx, u);
                Ok(())
            }
            Err(e) => {
                self.clear();
                match e.downcast_ref::<Refusal>() {
                    Some(r) => {
                        cx.send_text(r.to_string()).await;
                        Ok(())
                    }
                    None => Err(e),
                }
            }
        }
    }

    fn finish(&mut self, cx: &mut ParserCx<'_>, u: Handle) {
        self.clear();
        cx.close();
        cx.login(u);
    }
}

#[async_trait]
impl SessionParser for LoginParser {
    fn name(&self) -> &'static str {
        "login"
    }

    async fn on_start(&mut self, cx: &mut ParserCx<'_>) -> anyhow::Result<()> {
        cx.send_text("Welcome to the hearth. Sit a while.").await;
        self.render(cx).await;
        Ok(())
    }

    async fn parse(&mut self, cx: &mut ParserCx<'_>, line: &str) -> anyhow::Result<()> {
        if line.trim().eq_ignore_ascii_case("return") {
            self.clear();
            self.render(cx).await;
            return Ok(());
        }

        let res = match self.state {
            LoginState::Username => self.handle_username(cx, line).await,
            LoginState::UsernameConfirm => {
                self.handle_username_confirm(line);
                Ok(())
            }
            LoginState::WelcomePassword => self.handle_welcome_password(cx, line).await,
            LoginState::NewPassword => {
                self.handle_new_password(cx, line).await;
                Ok(())
            }
            LoginState::PasswordConfirm => self.handle_password_confirm(cx, line).await,
        };
        // Leaving for the main menu: no prompt.
        if res.is_err() || cx.is_closing() {
            return res;
        }
        self.render(cx).await;
        Ok(())
    }

    async fn on_close(&mut self, _cx: &mut ParserCx<'_>) -> anyhow::Result<()> {
        self.clear();
        Ok(())
    }
}
