//! Line-oriented command loop over an open virtual file system.
//!
//! One command per line. A failed command prints its error and the loop
//! continues; `q!` (or end of input) saves and exits cleanly.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::Result;
use poolfs::VirtualFileSystem;

const HELP: &str = "\
commands:
  pwd                                 print the current directory
  cd <path>                           change the current directory
  ls [path]                           list a directory (default: current)
  mkdir <path>                        create a directory
  cp <src> <dst>                      copy within the namespace
  mv <src> <dst>                      move or rename within the namespace
  rm <path>                           delete a file or directory
  cat <path>                          print a file's content
  meta <path>                         print a node's metadata
  cp_from_outside <outer> <inner>     import a host file or directory
  cp_to_outside <inner> <outer>       export to the host
  cp_from_outside_ex <outer> <inner> <ext,ext,...>
                                      import, keeping matching files only
  cp_to_outside_ex <inner> <outer> <ext,ext,...>
                                      export, keeping matching files only
  diff <base> <patch>                 compare two directories by digest
  q!                                  save and exit
";

/// Runs the shell until `q!` or end of input, then closes the system.
pub fn repl(mut vfs: VirtualFileSystem) -> Result<()> {
    println!(
        "poolfs: root '{}', user '{}'. Type 'help' for commands.",
        vfs.root_dir().display(),
        vfs.user_id()
    );
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        print!("{}> ", vfs.cwd());
        stdout.flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else {
            continue;
        };
        if command == "q!" {
            break;
        }
        if let Err(e) = dispatch(&mut vfs, command, args) {
            eprintln!("error: {e}");
        }
    }
    vfs.close()?;
    Ok(())
}

fn dispatch(vfs: &mut VirtualFileSystem, command: &str, args: &[&str]) -> Result<()> {
    match (command, args) {
        ("help", _) => print!("{HELP}"),
        ("pwd", []) => println!("{}", vfs.cwd()),
        ("cd", [path]) => vfs.chdir(path)?,
        ("ls", []) => list(vfs, "")?,
        ("ls", [path]) => list(vfs, path)?,
        ("mkdir", [path]) => vfs.mkdir(path)?,
        ("cp", [src, dst]) => vfs.copy_entry(src, dst)?,
        ("mv", [src, dst]) => vfs.move_entry(src, dst)?,
        ("rm", [path]) => vfs.delete(path)?,
        ("cat", [path]) => print!("{}", vfs.read_to_string(path, 0, None)?),
        ("meta", [path]) => {
            for (key, value) in vfs.metadata(path)? {
                println!("{key}\t{value}");
            }
        }
        ("cp_from_outside", [outer, inner]) => {
            vfs.copy_from_outside(Path::new(outer), inner)?;
        }
        ("cp_to_outside", [inner, outer]) => {
            vfs.copy_to_outside(inner, Path::new(outer))?;
        }
        ("cp_from_outside_ex", [outer, inner, exts]) => {
            vfs.copy_dir_from_outside_ex(Path::new(outer), inner, &extensions(exts))?;
        }
        ("cp_to_outside_ex", [inner, outer, exts]) => {
            vfs.copy_dir_to_outside_ex(inner, Path::new(outer), &extensions(exts))?;
        }
        ("diff", [base, patch]) => print!("{}", vfs.compare(base, patch)?),
        _ => anyhow::bail!("invalid command or arguments (type 'help')"),
    }
    Ok(())
}

/// Prints a directory listing, marking subdirectories with a trailing `/`.
fn list(vfs: &VirtualFileSystem, path: &str) -> Result<()> {
    for name in vfs.list(path)? {
        let child = if path.is_empty() {
            name.clone()
        } else if path.ends_with('/') {
            format!("{path}{name}")
        } else {
            format!("{path}/{name}")
        };
        if vfs.is_dir(&child)? {
            println!("{name}/");
        } else {
            println!("{name}");
        }
    }
    Ok(())
}

/// Splits the comma-separated extension list of the `_ex` commands.
fn extensions(list: &str) -> Vec<String> {
    list.split(',').map(str::to_owned).collect()
}
