//! Message-bus route naming: `{domain}.{service}.{request|response}`.

use conduit_types::ConduitError;
use std::fmt;
use std::str::FromStr;

/// Which half of a request/reply exchange a subject carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

/// A routable message-bus subject, e.g. `mcp.orchestrator.request`.
///
/// Segments are checked on construction, so every subject formats to a
/// string that [`Subject::parse`] accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    domain: String,
    service: String,
    direction: Direction,
}

impl Subject {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        direction: Direction,
    ) -> Result<Self, ConduitError> {
        let domain = domain.into();
        let service = service.into();
        check_segment("domain", &domain)?;
        check_segment("service", &service)?;
        Ok(Self {
            domain,
            service,
            direction,
        })
    }

    pub fn request(
        domain: impl Into<String>,
        service: impl Into<String>,
    ) -> Result<Self, ConduitError> {
        Self::new(domain, service, Direction::Request)
    }

    pub fn response(
        domain: impl Into<String>,
        service: impl Into<String>,
    ) -> Result<Self, ConduitError> {
        Self::new(domain, service, Direction::Response)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The subject a reply to this request is published on.
    pub fn reply_subject(&self) -> Self {
        Self {
            direction: Direction::Response,
            ..self.clone()
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConduitError> {
        let mut parts = s.split('.');
        let (Some(domain), Some(service), Some(direction), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ConduitError::Validation(format!(
                "subject '{s}' must have the form domain.service.request|response"
            )));
        };
        let direction = match direction {
            "request" => Direction::Request,
            "response" => Direction::Response,
            other => {
                return Err(ConduitError::Validation(format!(
                    "unknown subject direction '{other}'"
                )))
            }
        };
        Self::new(domain, service, direction)
    }
}

/// A segment must be non-empty and free of dots and whitespace.
fn check_segment(what: &str, segment: &str) -> Result<(), ConduitError> {
    if segment.is_empty() {
        return Err(ConduitError::Validation(format!("subject {what} is empty")));
    }
    if segment.contains('.') || segment.chars().any(char::is_whitespace) {
        return Err(ConduitError::Validation(format!(
            "subject {what} '{segment}' may not contain dots or whitespace"
        )));
    }
    Ok(())
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.domain,
            self.service,
            self.direction.as_str()
        )
    }
}

impl FromStr for Subject {
    type Err = ConduitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subject::parse(s)
    }
}
