use anyhow::{anyhow, bail, Error};
use std::fmt;

/// A single message sent from the simulator to the viewer.
///
/// On the wire a message is one line of text per connection:
/// `clear`, or `t;loc:level;loc:level` with two decimals for each number.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Drop all levels received so far
    Clear,
    /// Levels at a simulation time (seconds), one per receiver location
    Levels { time: f64, levels: Vec<(String, f64)> },
}

const CLEAR: &str = "clear";

impl Message {
    /// Build a levels message, checking that every location can be put on the wire.
    pub fn levels<S: AsRef<str>>(time: f64, levels: &[(S, f64)]) -> Result<Self, Error> {
        if !time.is_finite() {
            bail!("Time {} is not finite", time);
        }
        let mut checked = Vec::with_capacity(levels.len());
        for (loc, level) in levels {
            let loc = loc.as_ref();
            if loc.is_empty() {
                bail!("Empty receiver location");
            }
            if loc.contains(';') {
                bail!("Receiver location {:?} contains a ';'", loc);
            }
            if !level.is_finite() {
                bail!("Level {} at {:?} is not finite", level, loc);
            }
            checked.push((loc.to_string(), *level));
        }
        Ok(Message::Levels {
            time,
            levels: checked,
        })
    }

    /// Parse a received message. An empty message carries nothing and yields `None`.
    ///
    /// The message is parsed completely before anything is returned, so a single bad
    /// token rejects the whole message.
    pub fn parse(text: &str) -> Result<Option<Self>, Error> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        if text == CLEAR {
            return Ok(Some(Message::Clear));
        }

        let mut tokens = text.split(';');
        let time = tokens
            .next()
            .unwrap_or_default()
            .trim()
            .parse::<f64>()
            .map_err(|e| anyhow!("Bad time in message {:?}: {}", text, e))?;
        if !time.is_finite() {
            bail!("Time {} in message {:?} is not finite", time, text);
        }

        let mut levels = vec![];
        for token in tokens {
            // locations may contain colons, the level is behind the last one
            let (loc, level) = token
                .rsplit_once(':')
                .ok_or_else(|| anyhow!("Missing ':' in token {:?}", token))?;
            if loc.is_empty() {
                bail!("Empty receiver location in token {:?}", token);
            }
            let level = level
                .trim()
                .parse::<f64>()
                .map_err(|e| anyhow!("Bad level in token {:?}: {}", token, e))?;
            if !level.is_finite() {
                bail!("Level {} in token {:?} is not finite", level, token);
            }
            levels.push((loc.to_string(), level));
        }

        Ok(Some(Message::Levels { time, levels }))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::Clear => write!(f, "{}", CLEAR),
            Message::Levels { time, levels } => {
                write!(f, "{:.2}", time)?;
                for (loc, level) in levels {
                    write!(f, ";{}:{:.2}", loc, level)?;
                }
                Ok(())
            }
        }
    }
}
