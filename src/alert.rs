// End-of-session audio cue.
//
// The cue is played on the bench computer, not the apparatus. Playback
// runs through an external audio player so the rig works on whatever the
// lab machine has installed (`aplay`, `paplay`, `afplay`, ...). Whether a
// cue is "currently playing" is the player process still running; callers
// rely on that state alone to avoid overlapping cues.

use crate::error::{Result, RigError};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

/// Playback seam for the end-of-session cue.
pub trait CuePlayer: Send {
    /// True while a previously started cue is still sounding.
    fn is_busy(&mut self) -> bool;

    /// Start the cue from the beginning.
    fn play(&mut self) -> Result<()>;
}

/// Plays the bundled cue asset through an external player process.
pub struct ProcessCuePlayer {
    player: String,
    asset: PathBuf,
    child: Option<Child>,
}

impl ProcessCuePlayer {
    pub fn new(player: impl Into<String>, asset: impl Into<PathBuf>) -> Self {
        Self {
            player: player.into(),
            asset: asset.into(),
            child: None,
        }
    }
}

impl CuePlayer for ProcessCuePlayer {
    fn is_busy(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn play(&mut self) -> Result<()> {
        let child = Command::new(&self.player)
            .arg(&self.asset)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                RigError::Cue(format!(
                    "failed to start {} for {}: {e}",
                    self.player,
                    self.asset.display()
                ))
            })?;
        self.child = Some(child);
        Ok(())
    }
}

/// Cue sink for headless benches with no audio output; never busy, never
/// fails.
#[derive(Default)]
pub struct NullCuePlayer {
    pub plays: u64,
}

impl CuePlayer for NullCuePlayer {
    fn is_busy(&mut self) -> bool {
        false
    }

    fn play(&mut self) -> Result<()> {
        self.plays += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_player_is_idle_before_first_play() {
        let mut player = ProcessCuePlayer::new("definitely-not-a-player", "bell.wav");
        assert!(!player.is_busy());
        // a missing player binary surfaces as a cue error, not a panic
        assert!(matches!(player.play(), Err(RigError::Cue(_))));
        assert!(!player.is_busy());
    }

    #[test]
    fn null_player_counts_plays_and_is_never_busy() {
        let mut player = NullCuePlayer::default();
        player.play().unwrap();
        player.play().unwrap();
        assert_eq!(player.plays, 2);
        assert!(!player.is_busy());
    }
}
