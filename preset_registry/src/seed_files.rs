//! Readers for the seed file formats presets accept: SQL scripts,
//! line-delimited JSON records and directory trees.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::SeedError;

/// Parse one record per non-blank line.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, SeedError> {
    let content = fs::read_to_string(path).map_err(SeedError::file(path))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| SeedError::Record {
                path: path.to_path_buf(),
                line: index + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Parse a file holding a sequence of JSON values, each paired with the
/// line it starts on. Values may span lines and need no separator beyond
/// whitespace.
pub fn read_json_stream(path: &Path) -> Result<Vec<(usize, Value)>, SeedError> {
    let content = fs::read_to_string(path).map_err(SeedError::file(path))?;
    let mut stream = serde_json::Deserializer::from_str(&content).into_iter::<Value>();
    let mut values = Vec::new();

    loop {
        let rest = &content[stream.byte_offset()..];
        let start = content.len() - rest.trim_start().len();
        let line = 1 + content[..start].matches('\n').count();

        match stream.next() {
            Some(Ok(value)) => values.push((line, value)),
            Some(Err(e)) => {
                return Err(SeedError::Record {
                    path: path.to_path_buf(),
                    line: e.line(),
                    message: e.to_string(),
                })
            }
            None => return Ok(values),
        }
    }
}

/// Records from every file in order, then the literal records.
pub fn files_then_literals<T>(files: &[PathBuf], literals: &[T]) -> Result<Vec<T>, SeedError>
where
    T: DeserializeOwned + Clone,
{
    let mut records = Vec::new();
    for file in files {
        records.extend(read_json_lines::<T>(file)?);
    }
    records.extend_from_slice(literals);
    Ok(records)
}

pub fn read_script(path: &Path) -> Result<String, SeedError> {
    fs::read_to_string(path).map_err(SeedError::file(path))
}

/// Contents of every script file in order, then the literal queries.
pub fn scripts_then_queries(files: &[PathBuf], queries: &[String]) -> Result<Vec<String>, SeedError> {
    let mut scripts = files
        .iter()
        .map(|file| read_script(file))
        .collect::<Result<Vec<_>, _>>()?;
    scripts.extend(queries.iter().cloned());
    Ok(scripts)
}

/// Split a T-SQL script on `GO` separator lines.
pub fn split_batches(script: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();

    for line in script.lines() {
        if line.trim().eq_ignore_ascii_case("go") {
            push_batch(&mut batches, &mut current);
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_batch(&mut batches, &mut current);

    batches
}

fn push_batch(batches: &mut Vec<String>, current: &mut String) {
    let batch = current.trim();
    if !batch.is_empty() {
        batches.push(batch.to_string());
    }
    current.clear();
}

/// A directory one level below a seed root, with its regular files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    pub name: String,
    pub files: Vec<PathBuf>,
}

/// Top-level directories of `root` and the files directly inside each,
/// sorted by name. Loose files at the top level are skipped.
pub fn data_dirs(root: &Path) -> Result<Vec<DataDir>, SeedError> {
    let mut dirs = Vec::new();

    for entry in walk(root).min_depth(1).max_depth(1) {
        let entry = entry.map_err(walk_error(root))?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let mut files = Vec::new();
        for file in walk(entry.path()).min_depth(1).max_depth(1) {
            let file = file.map_err(walk_error(entry.path()))?;
            if file.file_type().is_file() {
                files.push(file.into_path());
            }
        }

        dirs.push(DataDir {
            name: entry.file_name().to_string_lossy().into_owned(),
            files,
        });
    }

    Ok(dirs)
}

/// Every file below `dir`, paired with its `/`-separated path relative to it.
pub fn files_recursive(dir: &Path) -> Result<Vec<(String, PathBuf)>, SeedError> {
    let mut files = Vec::new();

    for entry in walk(dir).min_depth(1) {
        let entry = entry.map_err(walk_error(dir))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(dir) {
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((key, entry.into_path()));
        }
    }

    files.sort();
    Ok(files)
}

/// File name without its extension.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn walk(dir: &Path) -> WalkDir {
    WalkDir::new(dir).follow_links(true).sort_by_file_name()
}

fn walk_error(root: &Path) -> impl FnOnce(walkdir::Error) -> SeedError + '_ {
    move |err| {
        let path = err.path().unwrap_or(root).to_path_buf();
        SeedError::File {
            path,
            source: err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Message {
        queue: String,
        body: String,
    }

    fn message(queue: &str, body: &str) -> Message {
        Message {
            queue: queue.into(),
            body: body.into(),
        }
    }

    #[test]
    fn test_json_lines_skip_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        fs::write(
            &path,
            "{\"queue\":\"q\",\"body\":\"one\"}\n\n{\"queue\":\"q\",\"body\":\"two\"}\n",
        )
        .unwrap();

        let records: Vec<Message> = read_json_lines(&path).unwrap();
        assert_eq!(records, vec![message("q", "one"), message("q", "two")]);
    }

    #[test]
    fn test_json_lines_report_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jsonl");
        fs::write(&path, "{\"queue\":\"q\",\"body\":\"one\"}\nnot json\n").unwrap();

        match read_json_lines::<Message>(&path) {
            Err(SeedError::Record { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_file_records_come_before_literals() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.jsonl");
        let second = dir.path().join("b.jsonl");
        fs::write(&first, "{\"queue\":\"q\",\"body\":\"file-a\"}\n").unwrap();
        fs::write(&second, "{\"queue\":\"q\",\"body\":\"file-b\"}\n").unwrap();

        let records =
            files_then_literals(&[first, second], &[message("q", "literal")]).unwrap();
        let bodies: Vec<_> = records.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["file-a", "file-b", "literal"]);
    }

    #[test]
    fn test_missing_file_is_a_file_error() {
        let err = read_script(Path::new("/nonexistent/schema.sql")).unwrap_err();
        assert!(matches!(err, SeedError::File { .. }));
    }

    #[test]
    fn test_split_batches_on_go_lines() {
        let script = "create table a (id int)\nGO\ninsert into a values (1)\n  go  \n\nGO\nselect 1";
        assert_eq!(
            split_batches(script),
            vec!["create table a (id int)", "insert into a values (1)", "select 1"]
        );
    }

    #[test]
    fn test_split_batches_keeps_go_inside_statements() {
        let script = "insert into t values ('GO')";
        assert_eq!(split_batches(script), vec!["insert into t values ('GO')"]);
    }

    #[test]
    fn test_json_stream_accepts_multiline_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        fs::write(
            &path,
            "{\n  \"name\": \"ada\",\n  \"age\": 36\n}\n{\n  \"name\": \"alan\"\n}{\"name\": \"grace\"}\n",
        )
        .unwrap();

        let values = read_json_stream(&path).unwrap();
        let names: Vec<_> = values.iter().map(|(_, v)| v["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["ada", "alan", "grace"]);
        assert_eq!(values[0].1["age"], 36);

        let lines: Vec<_> = values.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, vec![1, 5, 7]);
    }

    #[test]
    fn test_json_stream_reports_line_of_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{\"a\": 1}\n{\n  \"b\": \n}\n").unwrap();

        match read_json_stream(&path) {
            Err(SeedError::Record { line, .. }) => assert_eq!(line, 4),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_data_dirs_and_recursive_files() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("db1")).unwrap();
        fs::create_dir_all(root.path().join("db2/nested")).unwrap();
        fs::write(root.path().join("loose.txt"), "x").unwrap();
        fs::write(root.path().join("db1/users.json"), "{}").unwrap();
        fs::write(root.path().join("db2/nested/file.txt"), "y").unwrap();

        let dirs = data_dirs(root.path()).unwrap();
        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[0].name, "db1");
        assert_eq!(file_stem(&dirs[0].files[0]), "users");
        assert!(dirs[1].files.is_empty());

        let files = files_recursive(&root.path().join("db2")).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "nested/file.txt");
    }

    #[test]
    fn test_recursive_files_are_sorted_by_key() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("b/c")).unwrap();
        fs::write(root.path().join("z.txt"), "z").unwrap();
        fs::write(root.path().join("a.txt"), "a").unwrap();
        fs::write(root.path().join("b/c/deep.txt"), "d").unwrap();

        let keys: Vec<_> = files_recursive(root.path())
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["a.txt", "b/c/deep.txt", "z.txt"]);
    }

    #[test]
    fn test_missing_data_dir_is_a_file_error() {
        let err = data_dirs(Path::new("/nonexistent/dump")).unwrap_err();
        assert!(matches!(err, SeedError::File { .. }));
    }
}
