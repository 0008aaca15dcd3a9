use std::fs;
use std::path::Path;

use crate::error::Result;

/// The hooks the server installs into every bare repo it manages.
const HOOK_NAMES: [&str; 3] = ["pre-receive", "update", "post-receive"];

/// The shared outer hook. It proxies stdin and arguments to every executable
/// in `hooks/<name>.d/` and fails on the first failing one, so operators can
/// drop their own scripts next to ours.
const HOOK_RUNNER: &str = r#"#!/usr/bin/env sh
set -e
test -n "${GIT_DIR}" || exit 1

stdin=$(cat)
hookname=$(basename "$0")

for hook in "${GIT_DIR}/hooks/${hookname}.d"/*; do
	test -x "${hook}" || continue
	echo "${stdin}" | "${hook}" "$@" || exit $?
done

exit 0
"#;

fn reentry_script(exe: &Path, hook: &str) -> String {
    // The update hook is the only one that takes arguments (ref, old, new).
    let args = match hook {
        "update" => r#" "$1" "$2" "$3""#,
        _ => "",
    };

    format!(
        r#"#!/usr/bin/env sh

if [ -z "$GITDIR_BASE_DIR" ]; then
	echo "warning: GITDIR_BASE_DIR not set, skipping hooks"
	exit 0
fi

exec "{exe}" hook {hook}{args}
"#,
        exe = exe.display(),
    )
}

/// Install (or refresh) the hook scripts for a bare repo at `repo_dir`.
/// Files are rewritten only when their bytes differ.
pub fn install(repo_dir: &Path, exe: &Path) -> Result<()> {
    for hook in HOOK_NAMES {
        let hook_dir = repo_dir.join("hooks").join(format!("{hook}.d"));
        fs::create_dir_all(&hook_dir)?;

        write_if_different(&hook_dir.join("gitdir"), reentry_script(exe, hook).as_bytes())?;
        write_if_different(&repo_dir.join("hooks").join(hook), HOOK_RUNNER.as_bytes())?;
    }

    Ok(())
}

fn write_if_different(path: &Path, data: &[u8]) -> Result<()> {
    if let Ok(existing) = fs::read(path) {
        if existing == data {
            return Ok(());
        }
    }

    fs::write(path, data)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_writes_all_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let exe = Path::new("/usr/local/bin/gitdir");

        install(dir.path(), exe).unwrap();

        for hook in HOOK_NAMES {
            let outer = dir.path().join("hooks").join(hook);
            let inner = dir.path().join("hooks").join(format!("{hook}.d/gitdir"));

            assert_eq!(fs::read(&outer).unwrap(), HOOK_RUNNER.as_bytes());

            let script = fs::read_to_string(&inner).unwrap();
            assert!(script.contains("/usr/local/bin/gitdir"), "{script}");
            assert!(script.contains(&format!("hook {hook}")), "{script}");
        }
    }

    #[test]
    fn test_update_hook_forwards_args() {
        let script = reentry_script(Path::new("/bin/gitdir"), "update");
        assert!(script.contains(r#"hook update "$1" "$2" "$3""#));

        let script = reentry_script(Path::new("/bin/gitdir"), "post-receive");
        assert!(script.trim_end().ends_with("hook post-receive"));
    }

    #[test]
    fn test_install_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let exe = Path::new("/bin/gitdir");

        install(dir.path(), exe).unwrap();

        let hook = dir.path().join("hooks/update");
        let before = fs::metadata(&hook).unwrap().modified().unwrap();

        install(dir.path(), exe).unwrap();
        let after = fs::metadata(&hook).unwrap().modified().unwrap();

        assert_eq!(before, after);
    }
}
