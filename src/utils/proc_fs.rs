use std::fs;
use std::path::PathBuf;

/// Состояние процесса по данным procfs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Завершился, но ещё не подобран родителем
    Zombie,
    Gone,
}

impl ProcessState {
    pub fn has_exited(&self) -> bool {
        !matches!(self, ProcessState::Running)
    }
}

fn stat_path(pid: u32) -> PathBuf {
    PathBuf::from(format!("/proc/{}/stat", pid))
}

/// Прочитать состояние процесса из /proc/<pid>/stat
pub fn process_state(pid: u32) -> ProcessState {
    match fs::read_to_string(stat_path(pid)) {
        Ok(stat) => parse_stat_state(&stat),
        Err(_) => ProcessState::Gone,
    }
}

/// Имя процесса (поле comm), если процесс ещё существует
pub fn process_name(pid: u32) -> Option<String> {
    let stat = fs::read_to_string(stat_path(pid)).ok()?;
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    Some(stat[open + 1..close].to_string())
}

// comm может содержать пробелы и скобки, поэтому состояние ищем после последней ')'
fn parse_stat_state(stat: &str) -> ProcessState {
    let state = stat
        .rfind(')')
        .and_then(|close| stat[close + 1..].split_whitespace().next());

    match state {
        Some("Z") | Some("X") | Some("x") => ProcessState::Zombie,
        Some(_) => ProcessState::Running,
        None => ProcessState::Gone,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_running_and_zombie_states() {
        assert_eq!(parse_stat_state("42 (bash) S 1 42 42 0"), ProcessState::Running);
        assert_eq!(parse_stat_state("42 (weird) name) Z 1 42"), ProcessState::Zombie);
        assert_eq!(parse_stat_state("garbage"), ProcessState::Gone);
    }

    #[test]
    fn current_process_is_running() {
        let pid = std::process::id();
        assert_eq!(process_state(pid), ProcessState::Running);
        assert!(process_name(pid).is_some());
    }
}
