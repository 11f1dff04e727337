use std::env;
use std::path::Path;
use std::process;
use std::time::SystemTime;

use domain::adapters::memory_repo::{InMemoryBlobStore, InMemoryRepo};
use domain::adapters::memory_session::MemorySession;
use domain::gate::{Entry, GateFlow, Phase, PreviewAction};
use domain::service::LinkRegistry;
use domain::token::NanoidTokenGenerator;
use domain::{Clock, ImageUpload, NewLink, ShareBase};

struct StdClock;
impl Clock for StdClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

type DemoRegistry =
    LinkRegistry<InMemoryRepo, InMemoryRepo, InMemoryBlobStore, NanoidTokenGenerator, StdClock>;

fn print_usage() {
    eprintln!(
        "{}\n\nUsage:\n  domain create <content-url> <ads-url> <image-path>\n  domain walk <content-url> <ads-url> <image-path> [--shortcut <watch|download|stream-hd|fast-server>]\n\nNotes:\n  - This demo CLI uses in-memory storage; data is not persisted across runs.\n  - `walk` creates a link and steps a simulated visitor through the gate.",
        domain::about()
    );
}

fn read_image(path: &str) -> Result<ImageUpload, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("cannot read {path}: {e}"))?;
    let file_name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".into());
    let content_type = match Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => Some("image/png".to_string()),
        Some("jpg") | Some("jpeg") => Some("image/jpeg".to_string()),
        Some("gif") => Some("image/gif".to_string()),
        Some("webp") => Some("image/webp".to_string()),
        _ => None,
    };
    Ok(ImageUpload {
        file_name,
        content_type,
        bytes,
    })
}

fn create_from_args(
    registry: &DemoRegistry,
    args: &mut impl Iterator<Item = String>,
) -> Result<domain::CreatedLink, String> {
    let (Some(content), Some(ads), Some(image_path)) = (args.next(), args.next(), args.next())
    else {
        return Err("expected <content-url> <ads-url> <image-path>".into());
    };
    let input = NewLink {
        content_url: content,
        ads_url: ads,
        image: Some(read_image(&image_path)?),
    };
    registry
        .create(input, &ShareBase::new("http://localhost:3001", "/"))
        .map_err(|e| format!("create failed: {}", e))
}

fn walk(registry: &DemoRegistry, created: &domain::CreatedLink, shortcut: Option<PreviewAction>) -> Result<(), String> {
    let token = created.link.token.clone();
    let mut session = MemorySession::new();

    // First visit
    let mut flow = GateFlow::new(token.clone());
    let phase = flow
        .load(registry, &session, Entry::FirstView)
        .map_err(|e| format!("load failed: {}", e))?;
    println!("visit 1: {:?}, click step {}", phase, flow.click_step().as_u8());
    if phase != Phase::Loaded {
        return Err("link vanished".into());
    }

    if let Some(action) = shortcut {
        let nav = flow.shortcut(action).map_err(|e| e.to_string())?;
        println!("  pressed {:?} -> {}", action.label(), nav.url());
        return Ok(());
    }

    // Two passes: first lands on the ad, the return visit reveals content
    for pass in 1..=2 {
        if pass == 2 {
            flow = GateFlow::new(token.clone());
            flow.load(registry, &session, Entry::FirstView)
                .map_err(|e| format!("reload failed: {}", e))?;
            println!("visit 2 (back from ad): click step {}", flow.click_step().as_u8());
        }
        let start = flow.press_continue().map_err(|e| e.to_string())?;
        println!("  countdown {start}");
        while flow.remaining().unwrap_or(0) > 0 {
            flow.tick().map_err(|e| e.to_string())?;
            println!("  countdown {}", flow.remaining().unwrap_or(0));
        }
        let nav = flow.get_link(&mut session).map_err(|e| e.to_string())?;
        println!("  get link -> {:?}", nav);
    }
    Ok(())
}

fn run() -> Result<(), String> {
    let mut args = env::args().skip(1); // skip program name

    let Some(cmd) = args.next() else {
        print_usage();
        return Ok(());
    };

    // Construct a demo registry with in-memory storage
    let repo = InMemoryRepo::new();
    let registry = LinkRegistry::new(
        repo.clone(),
        repo,
        InMemoryBlobStore::new(),
        NanoidTokenGenerator::new(),
        StdClock,
    );

    match cmd.as_str() {
        "create" => {
            let created = create_from_args(&registry, &mut args)?;
            println!("{}", created.share_url);
            Ok(())
        }
        "walk" => {
            let created = create_from_args(&registry, &mut args)?;
            println!("created: {}", created.share_url);
            let rest: Vec<String> = args.collect();
            let shortcut = match rest.as_slice() {
                [] => None,
                [flag, val] if flag == "--shortcut" => Some(
                    PreviewAction::parse(val).ok_or_else(|| format!("unknown shortcut: {}", val))?,
                ),
                [unk, ..] => return Err(format!("unknown argument: {}", unk)),
            };
            walk(&registry, &created, shortcut)?;
            let total = registry
                .visitor_total()
                .map_err(|e| format!("stats failed: {}", e))?;
            println!("total visitors: {}", total.total);
            Ok(())
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn main() {
    if let Err(msg) = run() {
        eprintln!("error: {}", msg);
        process::exit(1);
    }
}
