use classasm::hello::{HelloStyle, DEFAULT_CLASS_NAME, DEFAULT_MESSAGE};
use classasm::jvm::class_file::{ClassFile, Version};
use classasm::jvm::{
    AssemblerSettings, BinaryName, ClassAssembler, CodeBuilderExts, FieldType, InvokeType,
    MethodAccessFlags, MethodDescriptor, MethodOp, Name, UnqualifiedName,
};
use classasm::runtime::{DynamicLoader, Error, Exception, Host};
use std::cell::RefCell;
use std::error::Error as _;
use std::fs;
use std::io::{self, Write};
use std::rc::Rc;

type Buffer = Rc<RefCell<Vec<u8>>>;

fn loader() -> (DynamicLoader, Buffer, Buffer) {
    let out = Rc::new(RefCell::new(vec![]));
    let err = Rc::new(RefCell::new(vec![]));
    let host = Host::new(out.clone(), err.clone()).unwrap();
    (DynamicLoader::new(host), out, err)
}

/// Load the class in a fresh loader, run `main`, and return what it printed
fn run_main(bytes: Vec<u8>) -> String {
    let (mut loader, out, _) = loader();
    let class = loader.load(bytes).unwrap();
    loader.invoke_main(&class).unwrap();
    let printed = out.borrow().clone();
    String::from_utf8(printed).unwrap()
}

#[test]
fn hello_world_in_every_style() {
    for style in HelloStyle::ALL {
        let bytes = style.assemble(DEFAULT_CLASS_NAME, DEFAULT_MESSAGE).unwrap();
        assert_eq!(run_main(bytes), "Hello world!\n", "{} style", style);
    }
}

#[test]
fn styles_agree_on_everything_but_declared_maxs() {
    let low_level = HelloStyle::LowLevel
        .assemble(DEFAULT_CLASS_NAME, DEFAULT_MESSAGE)
        .unwrap();
    let adapter = HelloStyle::Adapter
        .assemble(DEFAULT_CLASS_NAME, DEFAULT_MESSAGE)
        .unwrap();
    let ops = HelloStyle::Ops
        .assemble(DEFAULT_CLASS_NAME, DEFAULT_MESSAGE)
        .unwrap();

    // The hand-declared `main` reserves one more local than it needs
    assert_eq!(adapter, ops);
    assert_eq!(low_level.len(), adapter.len());
    let differences: Vec<usize> = low_level
        .iter()
        .zip(&adapter)
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(idx, _)| idx)
        .collect();
    assert_eq!(differences.len(), 1);
    assert_eq!(low_level[differences[0]], 2);
    assert_eq!(adapter[differences[0]], 1);
}

#[test]
fn custom_class_and_message() {
    let message = "h\u{e9}llo \0 w\u{f6}rld \u{1F980}";
    for style in HelloStyle::ALL {
        let bytes = style.assemble("org/example/Greeter", message).unwrap();
        assert_eq!(run_main(bytes), format!("{}\n", message), "{} style", style);
    }
}

#[test]
fn class_files_survive_the_file_system() {
    let mut assembler = ClassAssembler::new(AssemblerSettings::new("org/example/Saved")).unwrap();
    assembler
        .add_default_constructor("java/lang/Object")
        .unwrap();
    assembler
        .add_static_method(
            "main",
            "([Ljava/lang/String;)V",
            &[MethodOp::Println(String::from("from disk"))],
        )
        .unwrap();
    let class_file: ClassFile = assembler.finish_class_file().unwrap();

    let dir = std::env::temp_dir().join(format!("classasm-test-{}", std::process::id()));
    let path = dir.join("org/example/Saved.class");
    class_file.save_to_path(&path, true).unwrap();
    let bytes = fs::read(&path).unwrap();
    fs::remove_dir_all(&dir).unwrap();

    assert_eq!(bytes, class_file.to_bytes().unwrap());
    assert_eq!(run_main(bytes), "from disk\n");
}

#[test]
fn java8_classes_load() {
    let settings = AssemblerSettings::new("Example").with_version(Version::JAVA8);
    let mut assembler = ClassAssembler::new(settings).unwrap();
    assembler
        .add_static_method(
            "main",
            "([Ljava/lang/String;)V",
            &[
                MethodOp::Print(String::from("no ")),
                MethodOp::Println(String::from("newline until now")),
            ],
        )
        .unwrap();
    let bytes = assembler.finish().unwrap();
    assert_eq!(run_main(bytes), "no newline until now\n");
}

#[test]
fn printing_to_standard_error() {
    let mut assembler = ClassAssembler::new(AssemblerSettings::new("Example")).unwrap();
    assembler
        .add_method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            UnqualifiedName::MAIN,
            MethodDescriptor::main(),
            |code| {
                code.get_static(
                    BinaryName::SYSTEM,
                    UnqualifiedName::ERR,
                    FieldType::print_stream(),
                )?;
                code.push_string("oops")?;
                code.invoke_declared(
                    InvokeType::Virtual,
                    BinaryName::PRINTSTREAM,
                    "void println (Object)",
                )?;
                code.return_value()
            },
        )
        .unwrap();
    let bytes = assembler.finish().unwrap();

    let (mut loader, out, err) = loader();
    let class = loader.load(bytes).unwrap();
    loader.invoke_main(&class).unwrap();
    assert!(out.borrow().is_empty());
    assert_eq!(&*err.borrow(), b"oops\n");
}

/// Sink whose writes always fail
struct Broken;

impl Write for Broken {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink is closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn host_failures_are_invocation_errors() {
    let host = Host::new(
        Rc::new(RefCell::new(Broken)),
        Rc::new(RefCell::new(io::sink())),
    )
    .unwrap();
    let mut loader = DynamicLoader::new(host);
    let bytes = HelloStyle::Ops
        .assemble(DEFAULT_CLASS_NAME, DEFAULT_MESSAGE)
        .unwrap();
    let class = loader.load(bytes).unwrap();

    let err = loader.invoke_main(&class).unwrap_err();
    assert!(err.source().is_some());
    match err {
        Error::Invocation {
            method,
            cause: Exception::Host(io_err),
        } => {
            assert_eq!(method, "Example.main([Ljava/lang/String;)V");
            assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
        }
        other => panic!("expected a host failure, got {:?}", other),
    }
}

#[test]
fn loaded_classes_keep_their_shape() {
    let (mut loader, _, _) = loader();
    let bytes = HelloStyle::LowLevel
        .assemble(DEFAULT_CLASS_NAME, DEFAULT_MESSAGE)
        .unwrap();
    let class = loader.load(bytes).unwrap();

    let main = class
        .method(&UnqualifiedName::MAIN, &MethodDescriptor::main())
        .unwrap();
    assert!(main.is_static());
    assert_eq!((main.max_stack, main.max_locals), (2, 2));
    let listing: Vec<String> = main.code.iter().map(ToString::to_string).collect();
    assert_eq!(
        listing,
        vec![
            "getstatic java/lang/System.out:Ljava/io/PrintStream;",
            "ldc \"Hello world!\"",
            "invokevirtual java/io/PrintStream.println(Ljava/lang/String;)V",
            "return",
        ]
    );

    let init = class
        .method(&UnqualifiedName::INIT, &MethodDescriptor::VOID)
        .unwrap();
    assert!(!init.is_static());
    assert_eq!(init.display_name(), "<init>()V");
    assert_eq!(class.super_class.as_str(), "java/lang/Object");
}
