use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::Image;
use crate::notify::{self, Notifier};
use crate::params::Params;
use crate::step::{self, Step};
use crate::vars::VarSource;

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

const COLOR_OK: &str = "#00cd66";
const COLOR_ERROR: &str = "#c42025";
const COLOR_INFO: &str = "#1e90ff";

const BUILD_TEMPLATE: &str = "Build platform: *{{ .BuildPlatform }}*
Build url: {{ .BuildUrl }}
Repository: {{ .BuildRepository }}
Commit: *{{ .BuildCommit }}*
Branch: *{{ if .BuildBranch }}{{ .BuildBranch }}{{ else }}n/a{{ end }}*
Tag: *{{ if .BuildTag }}{{ .BuildTag }}{{ else }}n/a{{ end }}*
Version: *{{ .ProjectVersion }}*
Environment: *{{ .Environment }}*";

const PROJECT_TEMPLATE: &str = "Version: *{{ .ProjectVersion }}*
Environment: *{{ .Environment }}*
Cluster: *{{ .KubernetesCluster }}*
Zone: *{{ .KubernetesZone }}*
Project: *{{ .CloudProject }}*
Registry: *{{ .CloudRegistry }}*";

const IMAGE_TEMPLATE: &str = "Container name: *{{ .ImageName }}*
Registry: {{ .CloudRegistry }}/{{ .ProjectFullName }}/{{ .ImageName }}:{{ .BuildVersion }}";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Attachment {
    pub pretext: String,
    pub text: String,
    pub color: String,
    pub mrkdwn_in: Vec<String>,
    pub ts: i64,
}

impl Attachment {
    fn new(text: String, color: &str) -> Self {
        Self {
            pretext: String::new(),
            text,
            color: color.to_string(),
            mrkdwn_in: vec!["text".to_string(), "pretext".to_string()],
            ts: chrono::Utc::now().timestamp(),
        }
    }

    fn with_pretext(mut self, pretext: &str) -> Self {
        self.pretext = pretext.to_string();
        self
    }
}

/// A rendered chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    username: &'a str,
    icon_emoji: &'a str,
    mrkdwn: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
    attachments: &'a [Attachment],
}

#[derive(Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
    ts: Option<String>,
}

fn error_attachment(error: &crate::Error) -> Attachment {
    Attachment::new(error.to_string(), COLOR_ERROR).with_pretext("Error details")
}

fn output_attachment(output: &str) -> Attachment {
    Attachment::new(format!("```{output}```"), COLOR_OK)
}

fn outcome_attachments(output: &str, error: Option<&crate::Error>) -> Vec<Attachment> {
    let mut attachments = vec![output_attachment(output)];
    if let Some(error) = error {
        attachments[0].color = COLOR_ERROR.to_string();
        attachments.push(error_attachment(error));
    }
    attachments
}

fn template_attachment(params: &Params, template: &str) -> Attachment {
    Attachment::new(params.expand_lossy(template), COLOR_INFO)
}

fn steps_params(params: &Params, steps: &[Step]) -> Params {
    params.merge(&Params::new().with("Steps", step::join(steps)))
}

pub fn release_started(params: &Params, steps: &[Step]) -> Message {
    let params = steps_params(params, steps);
    Message {
        text: params.expand_lossy(
            ":rocket: *{{ .ProjectFullName }}* is being run with steps `{{ .Steps }}` on *{{ .Environment }}* with version `{{ .ProjectVersion }}`",
        ),
        attachments: vec![template_attachment(&params, BUILD_TEMPLATE)],
    }
}

pub fn release_completed(params: &Params, steps: &[Step], error: Option<&crate::Error>) -> Message {
    let params = steps_params(params, steps);
    match error {
        None => Message {
            text: params.expand_lossy("`{{ .Steps }}` ended *successfully* :heart:"),
            attachments: vec![],
        },
        Some(error) => Message {
            text: params.expand_lossy("`{{ .Steps }}` has *failed* :cry:"),
            attachments: vec![error_attachment(error)],
        },
    }
}

pub fn image_building(params: &Params, image: &Image) -> Message {
    let params = params.merge(&Params::from_image(image));
    Message {
        text: params.expand_lossy("Container *{{ .ImageName }}* is being built..."),
        attachments: vec![template_attachment(&params, IMAGE_TEMPLATE)],
    }
}

pub fn image_built(params: &Params, image: &Image, output: &str, error: Option<&crate::Error>) -> Message {
    let params = params.merge(&Params::from_image(image));
    let text = match error {
        None => "Container *{{ .ImageName }}* was built successfully :grin:",
        Some(_) => "Container *{{ .ImageName }}* failed to build :cry:",
    };
    Message {
        text: params.expand_lossy(text),
        attachments: outcome_attachments(output, error),
    }
}

pub fn image_pushing(params: &Params, image: &Image) -> Message {
    let params = params.merge(&Params::from_image(image));
    Message {
        text: params.expand_lossy("Container *{{ .ImageName }}* is being pushed... :boat:"),
        attachments: vec![],
    }
}

pub fn image_pushed(params: &Params, image: &Image, output: &str, error: Option<&crate::Error>) -> Message {
    let params = params.merge(&Params::from_image(image));
    let text = match error {
        None => "Container *{{ .ImageName }}* was successfully pushed to registry :grin:",
        Some(_) => "Container *{{ .ImageName }}* failed to push to registry :cry:",
    };
    Message {
        text: params.expand_lossy(text),
        attachments: outcome_attachments(output, error),
    }
}

pub fn configuration_validated(error: Option<&crate::Error>) -> Message {
    match error {
        None => Message {
            text: "Kubernetes deployment configuration is valid :small_airplane:".to_string(),
            attachments: vec![],
        },
        Some(error) => Message {
            text: "Kubernetes deployment configuration is invalid :cry:".to_string(),
            attachments: vec![error_attachment(error)],
        },
    }
}

pub fn deploying(params: &Params) -> Message {
    Message {
        text: params.expand_lossy(
            "Deploying to *{{ .Environment }}* cluster *{{ .KubernetesCluster }}*... :rocket:",
        ),
        attachments: vec![template_attachment(params, PROJECT_TEMPLATE)],
    }
}

pub fn deployed(params: &Params, output: &str, error: Option<&crate::Error>) -> Message {
    let text = match error {
        None => "Deployed successfully to *{{ .Environment }}* :trophy:",
        Some(_) => "Failed to deploy to *{{ .Environment }}* :tired_face:",
    };
    Message {
        text: params.expand_lossy(text),
        attachments: outcome_attachments(output, error),
    }
}

/// Posts release progress to a Slack channel, threading every message of a
/// run under the first one.
pub struct SlackNotifier {
    client: reqwest::blocking::Client,
    token: String,
    channel: String,
    bot_name: String,
    params: Params,
    thread_ts: Option<String>,
}

impl SlackNotifier {
    /// Configured from `SLACK_TOKEN`, `SLACK_CHANNEL_ID` and `SLACK_BOT_NAME`.
    /// Returns `None` without a token.
    pub fn from_env(vars: &dyn VarSource, params: Params) -> Result<Option<Self>, notify::Error> {
        let Some(token) = vars.non_empty("SLACK_TOKEN") else {
            return Ok(None);
        };
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("gcpb/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Some(Self {
            client,
            token,
            channel: vars.var_or("SLACK_CHANNEL_ID", "release"),
            bot_name: vars.var_or("SLACK_BOT_NAME", "gcpb"),
            params,
            thread_ts: None,
        }))
    }

    fn post(&mut self, message: Message) -> notify::Result {
        let payload = PostMessage {
            channel: &self.channel,
            text: &message.text,
            username: &self.bot_name,
            icon_emoji: ":rocket:",
            mrkdwn: true,
            thread_ts: self.thread_ts.as_deref(),
            attachments: &message.attachments,
        };

        let response: PostMessageResponse = self
            .client
            .post(POST_MESSAGE_URL)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()?
            .error_for_status()?
            .json()?;

        if !response.ok {
            return Err(notify::Error::Rejected(
                response.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        debug!(
            "Sent notification to channel {} at {}",
            self.channel,
            response.ts.as_deref().unwrap_or("?")
        );
        if self.thread_ts.is_none() {
            self.thread_ts = response.ts;
        }
        Ok(())
    }
}

impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    fn is_configured(&self) -> bool {
        !self.channel.is_empty()
    }

    fn on_release_started(&mut self, steps: &[Step]) -> notify::Result {
        let message = release_started(&self.params, steps);
        self.post(message)
    }

    fn on_release_completed(&mut self, steps: &[Step], error: Option<&crate::Error>) -> notify::Result {
        let message = release_completed(&self.params, steps, error);
        self.post(message)
    }

    fn on_image_building(&mut self, image: &Image) -> notify::Result {
        let message = image_building(&self.params, image);
        self.post(message)
    }

    fn on_image_built(&mut self, image: &Image, output: &str, error: Option<&crate::Error>) -> notify::Result {
        let message = image_built(&self.params, image, output, error);
        self.post(message)
    }

    fn on_image_pushing(&mut self, image: &Image) -> notify::Result {
        let message = image_pushing(&self.params, image);
        self.post(message)
    }

    fn on_image_pushed(&mut self, image: &Image, output: &str, error: Option<&crate::Error>) -> notify::Result {
        let message = image_pushed(&self.params, image, output, error);
        self.post(message)
    }

    fn on_configuration_validated(&mut self, error: Option<&crate::Error>) -> notify::Result {
        self.post(configuration_validated(error))
    }

    fn on_deploying(&mut self) -> notify::Result {
        let message = deploying(&self.params);
        self.post(message)
    }

    fn on_deployed(&mut self, output: &str, error: Option<&crate::Error>) -> notify::Result {
        let message = deployed(&self.params, output, error);
        self.post(message)
    }
}
