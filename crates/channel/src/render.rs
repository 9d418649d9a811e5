use serde::Serialize;
use thiserror::Error;

use slotline_core::domain::outbound::{ListRow, MessageKind, OutboundRequest, ReplyButton};

pub const MAX_BODY_CHARS: usize = 4096;
pub const MAX_BUTTONS: usize = 3;
pub const MAX_BUTTON_TITLE_CHARS: usize = 20;
pub const MAX_LIST_ROWS: usize = 10;
pub const MAX_ROW_TITLE_CHARS: usize = 24;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("message body is empty")]
    EmptyBody,
    #[error("message body has {0} characters, above the channel limit")]
    BodyTooLong(usize),
    #[error("{0} buttons requested, above the channel limit")]
    TooManyButtons(usize),
    #[error("template name is empty")]
    EmptyTemplateName,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SendPayload {
    pub to: String,
    #[serde(flatten)]
    pub content: PayloadContent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayloadContent {
    Text { text: TextBody },
    Interactive { interactive: Interactive },
    Template { template: TemplateBody },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Interactive {
    Button { body: TextBody, action: ButtonAction },
    List { body: TextBody, action: ListAction },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ButtonAction {
    pub buttons: Vec<ButtonElement>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ButtonElement {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub reply: ButtonReply,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ButtonReply {
    pub id: String,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ListAction {
    pub button: String,
    pub sections: Vec<ListSection>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<RowElement>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RowElement {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TemplateBody {
    pub name: String,
    pub language: TemplateLanguage,
    pub components: Vec<TemplateComponent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TemplateLanguage {
    pub code: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TemplateComponent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub parameters: Vec<TemplateParameter>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TemplateParameter {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

pub struct PayloadBuilder {
    to: String,
    body: String,
}

impl PayloadBuilder {
    pub fn new(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self { to: to.into(), body: body.into() }
    }

    pub fn text(self) -> SendPayload {
        SendPayload { to: self.to, content: PayloadContent::Text { text: TextBody { body: self.body } } }
    }

    pub fn buttons<F>(self, build: F) -> SendPayload
    where
        F: FnOnce(&mut ButtonsBuilder),
    {
        let mut builder = ButtonsBuilder::default();
        build(&mut builder);
        SendPayload {
            to: self.to,
            content: PayloadContent::Interactive {
                interactive: Interactive::Button {
                    body: TextBody { body: self.body },
                    action: ButtonAction { buttons: builder.buttons },
                },
            },
        }
    }

    pub fn list<F>(self, button_label: impl Into<String>, build: F) -> SendPayload
    where
        F: FnOnce(&mut ListBuilder),
    {
        let mut builder = ListBuilder::default();
        build(&mut builder);
        SendPayload {
            to: self.to,
            content: PayloadContent::Interactive {
                interactive: Interactive::List {
                    body: TextBody { body: self.body },
                    action: ListAction {
                        button: truncate(&button_label.into(), MAX_BUTTON_TITLE_CHARS),
                        sections: vec![ListSection { title: "Options".to_string(), rows: builder.rows }],
                    },
                },
            },
        }
    }
}

#[derive(Default)]
pub struct ButtonsBuilder {
    buttons: Vec<ButtonElement>,
}

impl ButtonsBuilder {
    pub fn button(&mut self, id: impl Into<String>, title: impl AsRef<str>) -> &mut Self {
        self.buttons.push(ButtonElement {
            kind: "reply",
            reply: ButtonReply {
                id: id.into(),
                title: truncate(title.as_ref(), MAX_BUTTON_TITLE_CHARS),
            },
        });
        self
    }
}

#[derive(Default)]
pub struct ListBuilder {
    rows: Vec<RowElement>,
}

impl ListBuilder {
    pub fn row(
        &mut self,
        id: impl Into<String>,
        title: impl AsRef<str>,
        description: Option<&str>,
    ) -> &mut Self {
        self.rows.push(RowElement {
            id: id.into(),
            title: truncate(title.as_ref(), MAX_ROW_TITLE_CHARS),
            description: description.map(str::to_string),
        });
        self
    }
}

/// Renders an outbound request into the channel's send payload. Lists longer
/// than the channel allows fall back to plain text; the body already carries
/// the numbered options.
pub fn render(request: &OutboundRequest) -> Result<SendPayload, RenderError> {
    let body = request.body.trim();
    let body_chars = body.chars().count();
    if body_chars > MAX_BODY_CHARS {
        return Err(RenderError::BodyTooLong(body_chars));
    }
    if body.is_empty() && !matches!(request.kind, MessageKind::Template { .. }) {
        return Err(RenderError::EmptyBody);
    }

    let builder = PayloadBuilder::new(request.recipient_handle.clone(), body);
    match &request.kind {
        MessageKind::Text => Ok(builder.text()),
        MessageKind::Buttons { buttons } => render_buttons(builder, buttons),
        MessageKind::List { rows, .. } if rows.is_empty() || rows.len() > MAX_LIST_ROWS => {
            Ok(builder.text())
        }
        MessageKind::List { button_label, rows } => Ok(render_list(builder, button_label, rows)),
        MessageKind::Template { name, language, parameters } => {
            if name.trim().is_empty() {
                return Err(RenderError::EmptyTemplateName);
            }
            Ok(SendPayload {
                to: request.recipient_handle.clone(),
                content: PayloadContent::Template {
                    template: TemplateBody {
                        name: name.trim().to_string(),
                        language: TemplateLanguage { code: language.clone() },
                        components: vec![TemplateComponent {
                            kind: "body",
                            parameters: parameters
                                .iter()
                                .map(|text| TemplateParameter { kind: "text", text: text.clone() })
                                .collect(),
                        }],
                    },
                },
            })
        }
    }
}

fn render_buttons(builder: PayloadBuilder, buttons: &[ReplyButton]) -> Result<SendPayload, RenderError> {
    if buttons.len() > MAX_BUTTONS {
        return Err(RenderError::TooManyButtons(buttons.len()));
    }
    if buttons.is_empty() {
        return Ok(builder.text());
    }
    Ok(builder.buttons(|actions| {
        for button in buttons {
            actions.button(button.id.clone(), &button.title);
        }
    }))
}

fn render_list(builder: PayloadBuilder, button_label: &str, rows: &[ListRow]) -> SendPayload {
    builder.list(button_label, |list| {
        for row in rows {
            list.row(row.id.clone(), &row.title, row.description.as_deref());
        }
    })
}

fn truncate(value: &str, max_chars: usize) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut shortened = trimmed.chars().take(max_chars.saturating_sub(1)).collect::<String>();
    shortened.push('…');
    shortened
}
