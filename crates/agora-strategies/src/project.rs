//! Multi-class test inputs for project based Python tasks.
//!
//! A test input holds several modules back to back. A new module starts at a
//! line beginning with `from ` or `class ` once the current one already
//! declares a class; the final module is whatever remains. Each module is saved
//! as the snake_case name of its class (`SampleClass` -> `sample_class.py`).
//!
//! Only those two prefixes are boundaries. A plain `import x` line between two
//! classes belongs to the module above it, so test authors put per-module
//! imports in `from x import y` form:
//!
//! ```text
//! class Shape:            <- module 1 (shape.py)
//!     pass
//! import math             <- still module 1
//! from shape import Shape <- module 2 (circle.py)
//! class Circle(Shape):
//!     pass
//! ```

use std::collections::HashSet;

use agora_common::{JudgeError, JudgeResult, TestCase};

const FILES_COUNT_MARKER: &str = "# project_files_count";

/// A file to create inside the project package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFile {
    pub file_name: String,
    pub content: String,
}

/// Number of project files declared in the task skeleton.
pub fn expected_files_count(skeleton: Option<&str>) -> JudgeResult<usize> {
    skeleton
        .unwrap_or_default()
        .lines()
        .find_map(|line| {
            line.trim()
                .strip_prefix(FILES_COUNT_MARKER)
                .and_then(|rest| rest.trim().parse().ok())
        })
        .ok_or_else(|| {
            JudgeError::Authoring(format!(
                "Expecting \"{FILES_COUNT_MARKER} \" in solution skeleton followed by the number of files that the project has"
            ))
        })
}

/// Split a test input into modules, validating the declared count.
pub fn project_files(test: &TestCase, expected: usize) -> JudgeResult<Vec<ProjectFile>> {
    let segments = split_classes(&test.input);

    if segments.len() != expected {
        return Err(JudgeError::Authoring(format!(
            "There should be {} classes in test #{}, but found {}. Ensure the test is correct",
            expected,
            test.id,
            segments.len()
        )));
    }

    let mut seen = HashSet::new();
    let mut files = Vec::with_capacity(segments.len());
    for content in segments {
        let class_name = declared_class(&content).ok_or_else(|| {
            JudgeError::Authoring(format!("Missing class declaration in test #{}", test.id))
        })?;
        let file_name = file_name_for_class(class_name);
        if !seen.insert(file_name.clone()) {
            return Err(JudgeError::Authoring(format!(
                "Duplicate project file {} in test #{}",
                file_name, test.id
            )));
        }
        files.push(ProjectFile { file_name, content });
    }

    Ok(files)
}

fn split_classes(input: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut has_class = false;

    for line in input.lines() {
        let is_class = line.starts_with("class ");
        let is_boundary = is_class || line.starts_with("from ");

        if is_boundary && has_class {
            segments.push(current.join("\n").trim().to_string());
            current.clear();
            has_class = false;
        }

        has_class |= is_class;
        current.push(line);
    }

    let rest = current.join("\n").trim().to_string();
    if !rest.is_empty() {
        segments.push(rest);
    }
    segments
}

fn declared_class(content: &str) -> Option<&str> {
    content.lines().find_map(|line| {
        let name = line.strip_prefix("class ")?.trim_start();
        let end = name
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(name.len());
        (end > 0).then(|| &name[..end])
    })
}

/// `SampleClass` -> `sample_class.py`
pub fn file_name_for_class(class_name: &str) -> String {
    let mut name = String::with_capacity(class_name.len() + 8);
    for (i, c) in class_name.chars().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            name.push('_');
        }
        name.push(c.to_ascii_lowercase());
    }
    name.push_str(".py");
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_with(input: &str) -> TestCase {
        TestCase {
            id: 7,
            input: input.into(),
            expected_output: String::new(),
            is_trial_test: false,
            order_by: 0,
        }
    }

    const TWO_CLASSES: &str = "\
from abc import ABC

class Shape(ABC):
    pass

from project.shape import Shape
import math

class CircleArea(Shape):
    def area(self):
        return math.pi
";

    #[test]
    fn test_file_names() {
        assert_eq!(file_name_for_class("SampleClass"), "sample_class.py");
        assert_eq!(file_name_for_class("Shape"), "shape.py");
        assert_eq!(file_name_for_class("A"), "a.py");
    }

    #[test]
    fn test_split_keeps_imports_with_their_class() {
        let files = project_files(&test_with(TWO_CLASSES), 2).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_name, "shape.py");
        assert_eq!(files[0].content, "from abc import ABC\n\nclass Shape(ABC):\n    pass");
        assert_eq!(files[1].file_name, "circle_area.py");
        assert!(files[1].content.starts_with("from project.shape import Shape\nimport math"));
    }

    #[test]
    fn test_count_mismatch_is_authoring_error() {
        let err = project_files(&test_with(TWO_CLASSES), 3).unwrap_err();
        assert!(err.is_authoring());
        assert!(err.to_string().contains("There should be 3 classes in test #7, but found 2"));
    }

    #[test]
    fn test_expected_files_count() {
        assert_eq!(expected_files_count(Some("# project_files_count 3\n")).unwrap(), 3);
        assert!(expected_files_count(None).unwrap_err().is_authoring());
        assert!(expected_files_count(Some("# project_files_count x")).is_err());
    }

    #[test]
    fn test_plain_import_stays_with_previous_module() {
        let modules = split_classes(
            "class Shape:\n    pass\nimport math\nfrom shape import Shape\nclass Circle(Shape):\n    pass",
        );
        assert_eq!(
            modules,
            vec![
                "class Shape:\n    pass\nimport math".to_string(),
                "from shape import Shape\nclass Circle(Shape):\n    pass".to_string(),
            ]
        );
    }
}
