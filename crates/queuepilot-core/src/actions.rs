//! Typed action batch the browsing agent expects from the model each turn
//!
//! The wire format is an object with an `action` array whose elements are
//! single-key objects mapping the action name to its parameters, e.g.
//! `{"action": [{"click": {"index": 5}}]}`. Parsing here is strict: element
//! indexes must already be integers. Repairing string indexes is the job of
//! the normalizer, which runs before this parser sees the text.

use crate::llm::shape::OutputShape;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Interactive element index as assigned by the page serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ElementIndex(pub u32);

impl std::fmt::Display for ElementIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Implemented by every action parameter type. Variants that act on a page
/// element name the wire field holding its index and report which element.
///
/// `index_field` is what the normalizer consults when it repairs textual
/// indexes, so a new parameter type only has to implement this trait to get
/// the same repair.
pub trait Indexed {
    /// Wire name of the parameter carrying the element index.
    fn index_field() -> Option<&'static str>
    where
        Self: Sized,
    {
        None
    }

    fn element_index(&self) -> Option<ElementIndex> {
        None
    }
}

macro_rules! indexed_by_field {
    ($($params:ty),* $(,)?) => {
        $(
            impl Indexed for $params {
                fn index_field() -> Option<&'static str> {
                    Some("index")
                }

                fn element_index(&self) -> Option<ElementIndex> {
                    Some(self.index)
                }
            }
        )*
    };
}

macro_rules! not_indexed {
    ($($params:ty),* $(,)?) => {
        $( impl Indexed for $params {} )*
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DoneParams {
    pub text: String,
    #[serde(default = "default_true")]
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchParams {
    pub query: String,
    #[serde(default = "default_engine")]
    pub engine: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NavigateParams {
    pub url: String,
    #[serde(default)]
    pub new_tab: bool,
}

/// Parameters of actions that take none. Extra keys are ignored since models
/// like to send `{"go_back": {"confirm": true}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NoParams {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WaitParams {
    #[serde(default = "default_wait_seconds")]
    pub seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ClickParams {
    pub index: ElementIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct InputParams {
    pub index: ElementIndex,
    pub text: String,
    #[serde(default = "default_true")]
    pub clear: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UploadFileParams {
    pub index: ElementIndex,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TabParams {
    pub tab_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExtractParams {
    pub query: String,
    #[serde(default)]
    pub extract_links: bool,
    #[serde(default)]
    pub start_from_char: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScrollParams {
    #[serde(default = "default_true")]
    pub down: bool,
    #[serde(default = "default_pages")]
    pub pages: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<ElementIndex>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SendKeysParams {
    pub keys: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FindTextParams {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DropdownOptionsParams {
    pub index: ElementIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SelectDropdownParams {
    pub index: ElementIndex,
    pub text: String,
}

indexed_by_field!(
    ClickParams,
    InputParams,
    UploadFileParams,
    DropdownOptionsParams,
    SelectDropdownParams,
);

not_indexed!(
    DoneParams,
    SearchParams,
    NavigateParams,
    NoParams,
    WaitParams,
    TabParams,
    ExtractParams,
    SendKeysParams,
    FindTextParams,
);

impl Indexed for ScrollParams {
    fn index_field() -> Option<&'static str> {
        Some("index")
    }

    fn element_index(&self) -> Option<ElementIndex> {
        self.index
    }
}

/// One browser action. Serialized externally tagged, so each variant maps to
/// a single-key object on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Done(DoneParams),
    Search(SearchParams),
    Navigate(NavigateParams),
    GoBack(NoParams),
    Wait(WaitParams),
    Click(ClickParams),
    Input(InputParams),
    UploadFile(UploadFileParams),
    Switch(TabParams),
    Close(TabParams),
    Extract(ExtractParams),
    Scroll(ScrollParams),
    SendKeys(SendKeysParams),
    FindText(FindTextParams),
    DropdownOptions(DropdownOptionsParams),
    SelectDropdown(SelectDropdownParams),
}

impl Action {
    fn params(&self) -> &dyn Indexed {
        match self {
            Action::Done(p) => p,
            Action::Search(p) => p,
            Action::Navigate(p) => p,
            Action::GoBack(p) => p,
            Action::Wait(p) => p,
            Action::Click(p) => p,
            Action::Input(p) => p,
            Action::UploadFile(p) => p,
            Action::Switch(p) | Action::Close(p) => p,
            Action::Extract(p) => p,
            Action::Scroll(p) => p,
            Action::SendKeys(p) => p,
            Action::FindText(p) => p,
            Action::DropdownOptions(p) => p,
            Action::SelectDropdown(p) => p,
        }
    }

    /// Wire name of the action, the key of its single-key object.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Done(_) => "done",
            Action::Search(_) => "search",
            Action::Navigate(_) => "navigate",
            Action::GoBack(_) => "go_back",
            Action::Wait(_) => "wait",
            Action::Click(_) => "click",
            Action::Input(_) => "input",
            Action::UploadFile(_) => "upload_file",
            Action::Switch(_) => "switch",
            Action::Close(_) => "close",
            Action::Extract(_) => "extract",
            Action::Scroll(_) => "scroll",
            Action::SendKeys(_) => "send_keys",
            Action::FindText(_) => "find_text",
            Action::DropdownOptions(_) => "dropdown_options",
            Action::SelectDropdown(_) => "select_dropdown",
        }
    }

    pub fn element_index(&self) -> Option<ElementIndex> {
        self.params().element_index()
    }

    /// Index field of the action called `name` on the wire, resolved through
    /// the parameter type's `Indexed` impl. Names outside the action set are
    /// assumed to use the conventional `index` field, so their indexes are
    /// still repaired before the strict parser rejects the action itself.
    pub fn index_field(name: &str) -> Option<&'static str> {
        match name {
            "done" => DoneParams::index_field(),
            "search" => SearchParams::index_field(),
            "navigate" => NavigateParams::index_field(),
            "go_back" => NoParams::index_field(),
            "wait" => WaitParams::index_field(),
            "click" => ClickParams::index_field(),
            "input" => InputParams::index_field(),
            "upload_file" => UploadFileParams::index_field(),
            "switch" | "close" => TabParams::index_field(),
            "extract" => ExtractParams::index_field(),
            "scroll" => ScrollParams::index_field(),
            "send_keys" => SendKeysParams::index_field(),
            "find_text" => FindTextParams::index_field(),
            "dropdown_options" => DropdownOptionsParams::index_field(),
            "select_dropdown" => SelectDropdownParams::index_field(),
            _ => Some("index"),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Action::Done(_))
    }
}

/// What the model returns for one agent step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_previous_goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_goal: Option<String>,
    pub action: Vec<Action>,
}

impl ActionBatch {
    pub fn single(action: Action) -> Self {
        Self {
            thinking: None,
            evaluation_previous_goal: None,
            memory: None,
            next_goal: None,
            action: vec![action],
        }
    }

    /// The action to execute this turn. Normalized batches hold at most one.
    pub fn first(&self) -> Option<&Action> {
        self.action.first()
    }
}

impl OutputShape for ActionBatch {
    const NAME: &'static str = "agent_output";
}

fn default_true() -> bool {
    true
}

fn default_engine() -> String {
    "duckduckgo".to_string()
}

fn default_wait_seconds() -> u32 {
    3
}

fn default_pages() -> f64 {
    1.0
}
