//! Static registry of the CRUD resources served under `/userapp/<name>`.

use super::schema::{FieldKind, FieldRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// `{data, paginator}` result.
    Paginated,
    /// Everything matching, as `{data: [...]}`.
    Unpaginated,
}

/// Behavior a resource adds on top of the CRUD template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    None,
    /// Exhibitors the caller has scanned are listed with `status: "Visited"`.
    VisitStatus,
    /// Like toggling and reply threads for Q&A entries.
    Discussion,
    /// Push delivery of stored notifications.
    PushDispatch,
}

/// Fields that together may appear at most once across a collection.
#[derive(Debug, Clone, Copy)]
pub struct UniqueRule {
    pub fields: &'static [&'static str],
    pub message: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceSpec {
    pub name: &'static str,
    pub fields: &'static [FieldRule],
    pub list_mode: ListMode,
    pub list_requires_auth: bool,
    /// Field stamped with the caller's id on create.
    pub owner_field: Option<&'static str>,
    pub unique: &'static [UniqueRule],
    /// Never returned to clients.
    pub hidden_fields: &'static [&'static str],
    /// Dropped from client input.
    pub protected_fields: &'static [&'static str],
    /// Trimmed and lowercased on input.
    pub normalized_fields: &'static [&'static str],
    pub extension: Extension,
}

impl ResourceSpec {
    const fn new(name: &'static str, fields: &'static [FieldRule]) -> Self {
        Self {
            name,
            fields,
            list_mode: ListMode::Paginated,
            list_requires_auth: false,
            owner_field: None,
            unique: &[],
            hidden_fields: &[],
            protected_fields: &[],
            normalized_fields: &[],
            extension: Extension::None,
        }
    }

    const fn unpaginated(mut self) -> Self {
        self.list_mode = ListMode::Unpaginated;
        self
    }

    const fn private_list(mut self) -> Self {
        self.list_requires_auth = true;
        self
    }

    const fn owned_by(mut self, field: &'static str) -> Self {
        self.owner_field = Some(field);
        self
    }

    const fn unique(mut self, rules: &'static [UniqueRule]) -> Self {
        self.unique = rules;
        self
    }

    const fn hiding(mut self, fields: &'static [&'static str]) -> Self {
        self.hidden_fields = fields;
        self.protected_fields = fields;
        self
    }

    const fn normalizing(mut self, fields: &'static [&'static str]) -> Self {
        self.normalized_fields = fields;
        self
    }

    const fn extended(mut self, extension: Extension) -> Self {
        self.extension = extension;
        self
    }
}

pub const EXHIBITOR_TYPES: &[&str] = &[
    "Platinum",
    "Gold",
    "Silver",
    "Exhibitor",
    "Bronze",
    "Diamond",
    "Super Platinum",
];

pub const VISIT_STATUSES: &[&str] = &["Pending", "Visited"];

/// Credential and lockout state kept on user documents.
pub const USER_SECRET_FIELDS: &[&str] = &[
    "password",
    "resetPasswordLink",
    "loginRetryLimit",
    "loginReactiveTime",
];

const fn text(name: &'static str) -> FieldRule {
    FieldRule::text(name)
}

const fn id(name: &'static str) -> FieldRule {
    FieldRule::id(name)
}

const fn number(name: &'static str) -> FieldRule {
    FieldRule::new(name, FieldKind::Number)
}

const fn list(name: &'static str) -> FieldRule {
    FieldRule::new(name, FieldKind::List)
}

const fn flag(name: &'static str) -> FieldRule {
    FieldRule::new(name, FieldKind::Bool)
}

pub static RESOURCES: &[ResourceSpec] = &[
    ResourceSpec::new(
        "agenda",
        &[
            text("title"),
            text("date"),
            text("time"),
            text("description"),
            text("hall"),
            id("eventId"),
            id("speakerId"),
        ],
    ),
    ResourceSpec::new(
        "askquestion",
        &[text("question"), text("answer"), id("eventId"), id("sessionId"), id("speakerId"), id("userId")],
    ),
    ResourceSpec::new(
        "committee",
        &[text("name"), text("designation"), text("image"), text("description"), id("eventId")],
    ),
    ResourceSpec::new(
        "contact",
        &[
            text("name"),
            FieldRule::new("email", FieldKind::Email),
            text("phone"),
            text("company"),
            text("message"),
            id("eventId"),
            id("userId"),
        ],
    ),
    ResourceSpec::new(
        "delegate",
        &[
            text("name"),
            FieldRule::new("email", FieldKind::Email),
            text("phone"),
            text("company"),
            text("designation"),
            text("image"),
            id("eventId"),
        ],
    )
    .unpaginated(),
    ResourceSpec::new("devicetoken", &[text("token").required(), text("platform"), id("userId")]),
    ResourceSpec::new("docs", &[text("title"), text("url"), text("type"), id("eventId")]),
    ResourceSpec::new("download", &[text("title"), text("url"), text("description"), id("eventId")]),
    ResourceSpec::new(
        "email",
        &[text("subject"), text("body"), list("to"), id("eventId")],
    ),
    ResourceSpec::new(
        "event",
        &[
            text("name"),
            text("description"),
            text("venue"),
            text("startDate"),
            text("endDate"),
            text("image"),
        ],
    ),
    ResourceSpec::new(
        "eventfeed",
        &[text("title"), text("description"), text("image"), id("eventId"), id("userId")],
    ),
    ResourceSpec::new(
        "eventinfo",
        &[text("title"), text("description"), text("image"), id("eventId")],
    ),
    ResourceSpec::new(
        "exhibitor",
        &[
            text("name"),
            text("stall"),
            text("hall"),
            text("image"),
            text("description"),
            text("website"),
            text("exhibitor_type")
                .one_of(EXHIBITOR_TYPES)
                .required()
                .default_to("Exhibitor"),
            text("status").one_of(VISIT_STATUSES).default_to("Pending"),
            id("eventId"),
            id("userId"),
            flag("isAppUser"),
        ],
    )
    .private_list()
    .extended(Extension::VisitStatus),
    ResourceSpec::new(
        "feedback",
        &[text("comment"), number("rating"), id("eventId"), id("sessionId"), id("userId")],
    ),
    ResourceSpec::new(
        "feedbackform",
        &[text("title"), list("questions"), id("eventId"), id("sessionId")],
    ),
    ResourceSpec::new(
        "feedbackresponse",
        &[list("answers"), id("feedbackformId"), id("eventId"), id("userId")],
    ),
    ResourceSpec::new(
        "leadscan",
        &[id("exhibitorId").required(), id("eventId"), id("userId"), text("notes")],
    )
    .private_list()
    .owned_by("userId")
    .unique(&[UniqueRule {
        fields: &["userId", "exhibitorId"],
        message: "A Leadscan already exists for this user and exhibitor combination.",
    }]),
    ResourceSpec::new(
        "meeting",
        &[
            text("event_date"),
            text("event_time"),
            text("event_location"),
            text("event_message"),
            FieldRule::new("event_type", FieldKind::Object),
            id("event_type.id"),
            text("event_type.type")
                .one_of(&["Committee", "Speaker", "Delegate"])
                .required(),
            id("eventId"),
            id("userId"),
        ],
    ),
    ResourceSpec::new(
        "message",
        &[text("message"), id("senderId"), id("receiverId"), id("eventId"), flag("isRead")],
    ),
    ResourceSpec::new(
        "notification",
        &[text("title"), text("body"), id("userId"), id("eventId"), flag("isRead")],
    )
    .extended(Extension::PushDispatch),
    ResourceSpec::new(
        "polls",
        &[text("question"), list("options"), id("sessionId"), id("eventId")],
    ),
    ResourceSpec::new(
        "pollresponse",
        &[id("pollsId"), id("sessionId"), text("selectedOption"), id("userId")],
    )
    .owned_by("userId")
    .unique(&[UniqueRule {
        fields: &["userId", "sessionId"],
        message: "You have already submitted a poll response for this session.",
    }]),
    ResourceSpec::new(
        "qanda",
        &[
            text("question"),
            id("sessionId"),
            id("eventId"),
            id("userId"),
            number("like"),
            list("likedBy"),
        ],
    )
    .extended(Extension::Discussion),
    ResourceSpec::new("quicklink", &[text("title"), text("url"), text("icon"), id("eventId")]),
    ResourceSpec::new(
        "quiz",
        &[text("question"), list("options"), text("answer"), id("sessionId"), id("eventId")],
    ),
    ResourceSpec::new(
        "quizresponse",
        &[id("quizId"), id("sessionId"), list("answers"), number("score"), id("userId")],
    )
    .owned_by("userId")
    .unique(&[UniqueRule {
        fields: &["userId", "sessionId"],
        message: "You have already submitted a quiz response for this session.",
    }]),
    ResourceSpec::new("quiztext", &[text("title"), text("description"), id("sessionId"), id("eventId")]),
    ResourceSpec::new("reply", &[text("reply"), id("qandaId").required(), id("userId")]),
    ResourceSpec::new(
        "review",
        &[text("comment"), number("rating"), id("eventId"), id("userId")],
    ),
    ResourceSpec::new(
        "session",
        &[
            text("title"),
            text("description"),
            text("date"),
            text("startTime"),
            text("endTime"),
            text("hall"),
            list("speakers"),
            id("eventId"),
        ],
    ),
    ResourceSpec::new("slider", &[text("title"), text("image"), text("link"), id("eventId")]),
    ResourceSpec::new(
        "speaker",
        &[
            text("name"),
            text("designation"),
            text("company"),
            text("bio"),
            text("image"),
            id("eventId"),
        ],
    ),
    ResourceSpec::new(
        "user",
        &[
            text("full_name"),
            FieldRule::new("email", FieldKind::Email),
            text("phone"),
            text("avatar"),
            number("userType"),
        ],
    )
    .hiding(USER_SECRET_FIELDS)
    .normalizing(&["email"])
    .unique(&[
        UniqueRule {
            fields: &["email"],
            message: "Email already exists. Unique email are allowed.",
        },
        UniqueRule {
            fields: &["phone"],
            message: "Phone already exists. Unique phone are allowed.",
        },
    ]),
];

pub fn find(name: &str) -> Option<&'static ResourceSpec> {
    RESOURCES.iter().find(|r| r.name == name)
}
