//! Step 12: create the image-requested user/group inside the new root by
//! appending raw lines to `/etc/passwd`, `/etc/group`, and `/etc/shadow`,
//! then populating a home directory from `/etc/skel` if present.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use anyhow::{Context, Result};

use pkg_types::volume::UserConfig;

const ROOT: &str = "/rootfs";

fn next_free_id(passwd_or_group: &str, start: u32) -> u32 {
    let used: std::collections::HashSet<u32> = passwd_or_group
        .lines()
        .filter_map(|line| line.split(':').nth(2))
        .filter_map(|id| id.parse().ok())
        .collect();
    let mut candidate = start;
    while used.contains(&candidate) {
        candidate += 1;
    }
    candidate
}

fn append_line(path: &str, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {path}"))?;
    writeln!(file, "{line}").with_context(|| format!("appending to {path}"))
}

/// Create the group and user described by `user`, if `user.create` is set,
/// and materialize its home directory. A no-op when the image has no user
/// config or `create` is false.
pub fn create_user(user: &UserConfig) -> Result<()> {
    if !user.create {
        return Ok(());
    }

    let passwd_path = format!("{ROOT}/etc/passwd");
    let group_path = format!("{ROOT}/etc/group");
    let shadow_path = format!("{ROOT}/etc/shadow");

    let group_name = user.group.clone().unwrap_or_else(|| user.name.clone());
    let group_contents = fs::read_to_string(&group_path).unwrap_or_default();
    let gid = user.gid.unwrap_or_else(|| next_free_id(&group_contents, 1000));

    if !group_contents
        .lines()
        .any(|l| l.split(':').next() == Some(group_name.as_str()))
    {
        append_line(&group_path, &format!("{group_name}:x:{gid}:"))?;
    }

    let passwd_contents = fs::read_to_string(&passwd_path).unwrap_or_default();
    let uid = user.uid.unwrap_or_else(|| next_free_id(&passwd_contents, 1000));
    let home = user.home.clone().unwrap_or_else(|| format!("/home/{}", user.name));
    let shell = user.shell.clone().unwrap_or_else(|| "/bin/sh".to_string());

    if !passwd_contents
        .lines()
        .any(|l| l.split(':').next() == Some(user.name.as_str()))
    {
        append_line(
            &passwd_path,
            &format!("{}:x:{uid}:{gid}::{home}:{shell}", user.name),
        )?;
        append_line(&shadow_path, &format!("{}:!:19000:0:99999:7:::", user.name))?;
    }

    for extra_group in &user.supplementary_groups {
        add_to_supplementary_group(&group_path, extra_group, &user.name)?;
    }

    let home_path = format!("{ROOT}{home}");
    fs::create_dir_all(&home_path).with_context(|| format!("creating home {home_path}"))?;
    fs::set_permissions(&home_path, fs::Permissions::from_mode(0o750))
        .with_context(|| format!("setting mode on {home_path}"))?;
    if uid != 0 {
        copy_skel(&home_path)?;
    }
    chown_recursive(&home_path, uid, gid)?;

    Ok(())
}

fn add_to_supplementary_group(group_path: &str, group: &str, user: &str) -> Result<()> {
    let contents = fs::read_to_string(group_path).unwrap_or_default();
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
    let mut found = false;
    for line in lines.iter_mut() {
        let mut fields: Vec<&str> = line.split(':').collect();
        if fields.first() == Some(&group) {
            found = true;
            let members = fields.get(3).copied().unwrap_or_default();
            if !members.split(',').any(|m| m == user) {
                let new_members = if members.is_empty() {
                    user.to_string()
                } else {
                    format!("{members},{user}")
                };
                if fields.len() > 3 {
                    fields[3] = &new_members;
                    *line = fields.join(":");
                } else {
                    *line = format!("{line}:{new_members}");
                }
            }
            break;
        }
    }
    if !found {
        return Ok(());
    }
    fs::write(group_path, lines.join("\n") + "\n").with_context(|| format!("rewriting {group_path}"))
}

fn copy_skel(home_path: &str) -> Result<()> {
    let skel = format!("{ROOT}/etc/skel");
    if !std::path::Path::new(&skel).is_dir() {
        return Ok(());
    }
    let is_empty = fs::read_dir(home_path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true);
    if !is_empty {
        return Ok(());
    }
    copy_dir_recursive(&skel, home_path)
}

fn copy_dir_recursive(from: &str, to: &str) -> Result<()> {
    for entry in fs::read_dir(from).with_context(|| format!("reading {from}"))? {
        let entry = entry?;
        let dest = format!("{to}/{}", entry.file_name().to_string_lossy());
        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&dest)?;
            copy_dir_recursive(&entry.path().to_string_lossy(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

fn chown_recursive(path: &str, uid: u32, gid: u32) -> Result<()> {
    nix::unistd::chown(path, Some(nix::unistd::Uid::from_raw(uid)), Some(nix::unistd::Gid::from_raw(gid)))
        .with_context(|| format!("chown {path}"))?;
    if std::path::Path::new(path).is_dir() {
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            chown_recursive(&entry.path().to_string_lossy(), uid, gid)?;
        }
    }
    Ok(())
}
