use builder_core::models::ServicePort;
use builder_core::{BuilderError, Language};
use builder_source::lang::require_language;
use builder_source::{analyze_project, detect_language, detect_with_config};
use builder_testing_utils::write_files;

const SPRING_POM: &str = r#"<project>
  <groupId>com.example</groupId>
  <artifactId>demo</artifactId>
  <version>1.0.0</version>
  <build>
    <plugins>
      <plugin>
        <groupId>org.springframework.boot</groupId>
        <artifactId>spring-boot-maven-plugin</artifactId>
      </plugin>
    </plugins>
  </build>
</project>"#;

#[test]
fn test_detects_fixture_projects() {
    let cases: &[(&[(&str, &str)], Language)] = &[
        (&[("Pipfile", "[packages]\n")], Language::Python),
        (&[("go.mod", "module example.com/app\n"), ("main.go", "package main")], Language::Go),
        (&[("pom.xml", SPRING_POM)], Language::JavaMaven),
        (&[("app.war", "")], Language::JavaWar),
        (&[("app.jar", ""), ("Procfile", "web: java -jar app.jar")], Language::JavaJar),
        (&[("package.json", "{}"), ("yarn.lock", "")], Language::Nodejs),
        (&[("index.html", "<html></html>")], Language::Static),
        (&[("Dockerfile", "FROM alpine:3.19\n"), ("go.mod", "module x")], Language::Dockerfile),
    ];

    for (files, expected) in cases {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), files);
        assert_eq!(detect_language(dir.path()), *expected, "files: {files:?}");
    }
}

#[test]
fn test_config_file_overrides_detection() {
    let dir = tempfile::tempdir().unwrap();
    write_files(
        dir.path(),
        &[
            ("Dockerfile", "FROM alpine:3.19\n"),
            ("pom.xml", SPRING_POM),
            ("katofile", "language: Java-maven\n"),
        ],
    );
    assert_eq!(detect_language(dir.path()), Language::Dockerfile);
    assert_eq!(detect_with_config(dir.path()).unwrap(), Language::JavaMaven);
}

#[test]
fn test_unknown_project() {
    let dir = tempfile::tempdir().unwrap();
    write_files(dir.path(), &[("README.md", "# nothing to build")]);
    assert!(matches!(
        require_language(dir.path()),
        Err(BuilderError::LanguageUnknown)
    ));
}

#[test]
fn test_analyze_maven_multi_module() {
    let dir = tempfile::tempdir().unwrap();
    write_files(
        dir.path(),
        &[
            (
                "pom.xml",
                "<project><artifactId>parent</artifactId><version>1.0</version><packaging>pom</packaging>\
                 <modules><module>api</module><module>web</module></modules></project>",
            ),
            (
                "api/pom.xml",
                "<project><parent><version>1.0</version></parent><artifactId>api</artifactId><packaging>jar</packaging></project>",
            ),
            (
                "web/pom.xml",
                "<project><parent><version>1.0</version></parent><artifactId>web</artifactId><packaging>war</packaging></project>",
            ),
            ("Procfile", "web: java -jar app.jar"),
        ],
    );

    let report = analyze_project(dir.path()).unwrap().into_result().unwrap();
    assert_eq!(report.language, Language::JavaMaven);
    assert_eq!(report.services.len(), 2);
    let api = report.services.iter().find(|s| s.cname == "api").unwrap();
    assert_eq!(api.build_path, "api");
    assert!(api.procfile.contains("api/target/api-1.0.jar"));
    assert_eq!(api.ports, vec![ServicePort::http(5000)]);
    let web = report.services.iter().find(|s| s.cname == "web").unwrap();
    assert!(web.procfile.contains("webapp-runner"));
}

#[test]
fn test_analyze_node_without_lock_file() {
    let dir = tempfile::tempdir().unwrap();
    write_files(dir.path(), &[("package.json", r#"{"engines": {"node": "^16.3.0"}}"#)]);
    let report = analyze_project(dir.path()).unwrap();
    assert_eq!(report.language, Language::Nodejs);
    assert!(report.has_fatal());
    assert!(matches!(
        report.into_result(),
        Err(BuilderError::SpecificationViolation(_))
    ));
}
