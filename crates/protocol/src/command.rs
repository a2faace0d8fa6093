//! Befehls- und Fehlercode-Vokabular
//!
//! Jeder Frame traegt einen Befehls-Tag in SCREAMING_SNAKE_CASE. Unbekannte
//! Tags werden nicht hier, sondern am Dispatch-Punkt abgelehnt, damit die
//! Verbindung mit einer Fehler-Antwort offen bleiben kann.

/// Alle bekannten Befehls-Tags des Steuerprotokolls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Basis
    Register,
    Keepalive,
    Reply,

    // Operator-Dienst
    JoinUserToChannel,
    PartUserFromChannel,
    DisconnectUser,
    DestroyChannel,
    GetUsersOnlineStatus,
    GetChannelUsers,
    GetControlToken,
    GetChannelToken,

    // Token-Verwaltung (Edge -> Master)
    RefreshToken,

    // Pushes an Edges/Clients
    UpdateToken,
    Unregister,
    UnregisterUser,

    // Relays (Edge -> Master)
    UserRegistered,
    UserUnregistered,
    UserJoinedChannel,
    UserLeftChannel,
    VoiceServerRegistered,
    VoiceServerUnregistered,

    // Event-Dienst
    Subscribe,
    Event,
}

impl Command {
    /// Gibt die Wire-Darstellung des Befehls zurueck
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Register => "REGISTER",
            Self::Keepalive => "KEEPALIVE",
            Self::Reply => "REPLY",
            Self::JoinUserToChannel => "JOIN_USER_TO_CHANNEL",
            Self::PartUserFromChannel => "PART_USER_FROM_CHANNEL",
            Self::DisconnectUser => "DISCONNECT_USER",
            Self::DestroyChannel => "DESTROY_CHANNEL",
            Self::GetUsersOnlineStatus => "GET_USERS_ONLINE_STATUS",
            Self::GetChannelUsers => "GET_CHANNEL_USERS",
            Self::GetControlToken => "GET_CONTROL_TOKEN",
            Self::GetChannelToken => "GET_CHANNEL_TOKEN",
            Self::RefreshToken => "REFRESH_TOKEN",
            Self::UpdateToken => "UPDATE_TOKEN",
            Self::Unregister => "UNREGISTER",
            Self::UnregisterUser => "UNREGISTER_USER",
            Self::UserRegistered => "USER_REGISTERED",
            Self::UserUnregistered => "USER_UNREGISTERED",
            Self::UserJoinedChannel => "USER_JOINED_CHANNEL",
            Self::UserLeftChannel => "USER_LEFT_CHANNEL",
            Self::VoiceServerRegistered => "VOICE_SERVER_REGISTERED",
            Self::VoiceServerUnregistered => "VOICE_SERVER_UNREGISTERED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Event => "EVENT",
        }
    }

    /// Parst einen Befehls-Tag aus der Wire-Darstellung
    pub fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "REGISTER" => Self::Register,
            "KEEPALIVE" => Self::Keepalive,
            "REPLY" => Self::Reply,
            "JOIN_USER_TO_CHANNEL" => Self::JoinUserToChannel,
            "PART_USER_FROM_CHANNEL" => Self::PartUserFromChannel,
            "DISCONNECT_USER" => Self::DisconnectUser,
            "DESTROY_CHANNEL" => Self::DestroyChannel,
            "GET_USERS_ONLINE_STATUS" => Self::GetUsersOnlineStatus,
            "GET_CHANNEL_USERS" => Self::GetChannelUsers,
            "GET_CONTROL_TOKEN" => Self::GetControlToken,
            "GET_CHANNEL_TOKEN" => Self::GetChannelToken,
            "REFRESH_TOKEN" => Self::RefreshToken,
            "UPDATE_TOKEN" => Self::UpdateToken,
            "UNREGISTER" => Self::Unregister,
            "UNREGISTER_USER" => Self::UnregisterUser,
            "USER_REGISTERED" => Self::UserRegistered,
            "USER_UNREGISTERED" => Self::UserUnregistered,
            "USER_JOINED_CHANNEL" => Self::UserJoinedChannel,
            "USER_LEFT_CHANNEL" => Self::UserLeftChannel,
            "VOICE_SERVER_REGISTERED" => Self::VoiceServerRegistered,
            "VOICE_SERVER_UNREGISTERED" => Self::VoiceServerUnregistered,
            "SUBSCRIBE" => Self::Subscribe,
            "EVENT" => Self::Event,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

/// Standardisierte Fehler-Codes fuer ERROR-Antworten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotEnoughArguments,
    InvalidArgument,
    ChannelNotFound,
    UserNotFound,
    NotInThatChannel,
    OutOfSync,
    ChannelAllocationFailed,
    Unavailable,
    InvalidToken,
    Timeout,
    TryAgain,
    LoggedInElsewhere,
    Internal,
}

impl ErrorCode {
    /// Gibt die Wire-Darstellung des Fehler-Codes zurueck
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::NotEnoughArguments => "NOT_ENOUGH_ARGUMENTS",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::ChannelNotFound => "CHANNEL_NOT_FOUND",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::NotInThatChannel => "NOT_IN_THAT_CHANNEL",
            Self::OutOfSync => "OUT_OF_SYNC",
            Self::ChannelAllocationFailed => "CHANNEL_ALLOCATION_FAILED",
            Self::Unavailable => "UNAVAILABLE",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::Timeout => "TIMEOUT",
            Self::TryAgain => "TRY_AGAIN",
            Self::LoggedInElsewhere => "LOGGED_IN_ELSEWHERE",
            Self::Internal => "INTERNAL",
        }
    }

    /// Parst einen Fehler-Code aus der Wire-Darstellung
    pub fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "NOT_ENOUGH_ARGUMENTS" => Self::NotEnoughArguments,
            "INVALID_ARGUMENT" => Self::InvalidArgument,
            "CHANNEL_NOT_FOUND" => Self::ChannelNotFound,
            "USER_NOT_FOUND" => Self::UserNotFound,
            "NOT_IN_THAT_CHANNEL" => Self::NotInThatChannel,
            "OUT_OF_SYNC" => Self::OutOfSync,
            "CHANNEL_ALLOCATION_FAILED" => Self::ChannelAllocationFailed,
            "UNAVAILABLE" => Self::Unavailable,
            "INVALID_TOKEN" => Self::InvalidToken,
            "TIMEOUT" => Self::Timeout,
            "TRY_AGAIN" => Self::TryAgain,
            "LOGGED_IN_ELSEWHERE" => Self::LoggedInElsewhere,
            "INTERNAL" => Self::Internal,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}
