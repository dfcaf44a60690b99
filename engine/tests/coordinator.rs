mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{channels, product, record_events, spawn_result, FakeCatalog};
use storefront_engine::{
    EngineError, EventBus, FrameScheduler, HashCodec, HashRouter, InstanceCoordinator, InstanceView,
    Location, LocationWrite, MemoryLocation, Params, ProductTarget, Routable, StoreEvent,
    VirtualPageStore,
};

struct Stage {
    location: Rc<MemoryLocation>,
    scheduler: Rc<FrameScheduler>,
    catalog: Rc<FakeCatalog>,
    router: Rc<HashRouter>,
    coordinator: InstanceCoordinator,
    events: Rc<RefCell<Vec<StoreEvent>>>,
}

impl Stage {
    fn new(hash: &str, products: usize) -> Self {
        let location = Rc::new(MemoryLocation::new(hash));
        let scheduler = Rc::new(FrameScheduler::new());
        let catalog = FakeCatalog::with_products(products);
        let bus = EventBus::new();
        let events = record_events(&bus);
        let router = Rc::new(HashRouter::new(location.clone(), HashCodec::default(), bus.clone()));
        let coordinator = InstanceCoordinator::new(router.clone(), bus, scheduler.clone());
        Self {
            location,
            scheduler,
            catalog,
            router,
            coordinator,
            events,
        }
    }

    fn store(&self) -> VirtualPageStore {
        VirtualPageStore::new(self.catalog.clone(), self.scheduler.clone(), 12, 2)
    }

    fn mount(&self, routable: Routable) -> storefront_engine::CatalogInstance {
        let instance = self.coordinator.mount(routable, None, self.store());
        self.scheduler.run_until_stalled();
        instance
    }

    fn selections(&self) -> Vec<(usize, String, Option<String>, Option<String>)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                StoreEvent::ProductSelected {
                    index,
                    product,
                    previous,
                    next,
                    ..
                } => Some((
                    *index,
                    product.slug.clone(),
                    previous.as_ref().map(|p| p.slug.clone()),
                    next.as_ref().map(|p| p.slug.clone()),
                )),
                _ => None,
            })
            .collect()
    }
}

// ── Election ───────────────────────────────────────────────────────────────

#[test]
fn test_first_routable_instance_is_the_only_primary() {
    let stage = Stage::new("", 20);
    let a = stage.mount(Routable::Auto);
    let b = stage.mount(Routable::Auto);
    let c = stage.mount(Routable::Always);

    assert!(a.is_primary());
    assert!(!b.is_primary());
    assert!(!c.is_primary());
    assert_eq!(stage.coordinator.primary_id(), Some(a.id()));
    assert_eq!(stage.coordinator.mounted(), 3);
}

#[test]
fn test_never_routable_leaves_role_free() {
    let stage = Stage::new("", 20);
    let a = stage.mount(Routable::Never);
    let b = stage.mount(Routable::Auto);
    assert!(!a.is_primary());
    assert!(b.is_primary());
}

#[test]
fn test_unmount_frees_role_for_next_mount_only() {
    let stage = Stage::new("", 20);
    let a = stage.mount(Routable::Auto);
    let b = stage.mount(Routable::Auto);

    stage.coordinator.unmount(&a);
    assert_eq!(stage.coordinator.primary_id(), None);
    assert!(!b.is_primary());

    let c = stage.mount(Routable::Auto);
    assert!(c.is_primary());
    assert_eq!(stage.coordinator.primary_id(), Some(c.id()));
}

#[test]
fn test_unmounted_primary_stops_following_url() {
    let stage = Stage::new("", 40);
    let a = stage.mount(Routable::Auto);
    stage.coordinator.unmount(&a);

    stage.location.navigate_externally("#!/?page=2");
    stage.router.handle_navigation();
    stage.scheduler.run_until_stalled();
    assert_eq!(a.view(), InstanceView::List { page: 1 });
}

// ── Primary ────────────────────────────────────────────────────────────────

#[test]
fn test_primary_starts_from_url_page() {
    let stage = Stage::new("#!/?page=2", 40);
    let a = stage.mount(Routable::Auto);

    assert_eq!(a.view(), InstanceView::List { page: 2 });
    let slice = a.current_slice();
    assert_eq!(slice.len(), 12);
    assert_eq!(slice[0], Some(product(12)));
    assert_eq!(stage.catalog.pages_requested(), vec![2]);
}

#[test]
fn test_primary_adopts_clamped_page() {
    let stage = Stage::new("#!/?page=9", 30);
    let a = stage.mount(Routable::Auto);
    assert_eq!(a.view(), InstanceView::List { page: 3 });
    assert_eq!(a.current_slice().len(), 6);
}

#[test]
fn test_primary_navigation_goes_through_url() {
    let stage = Stage::new("", 40);
    let a = stage.mount(Routable::Auto);

    a.open_product(3).unwrap();
    assert_eq!(stage.location.hash(), "#!/product-3");
    assert_eq!(
        a.view(),
        InstanceView::Product {
            slug: "product-3".to_string(),
            index: Some(3)
        }
    );
    assert!(channels(&stage.events).contains(&"state-change"));

    stage.scheduler.run_until_stalled();
    let shown = a.selected_product().unwrap();
    assert_eq!(shown.description.as_deref(), Some("All about Product 3"));

    a.back_to_list();
    assert_eq!(stage.location.last_write(), Some(LocationWrite::ReplaceWithoutHash));
    assert_eq!(a.view(), InstanceView::List { page: 1 });
    assert!(stage.selections().is_empty());
}

#[test]
fn test_primary_go_to_page_writes_page_param() {
    let stage = Stage::new("", 40);
    let a = stage.mount(Routable::Auto);

    let shown = spawn_result(&stage.scheduler, a.go_to_page(3));
    assert_eq!(stage.location.hash(), "#!/?page=3");
    stage.scheduler.run_until_stalled();

    assert_eq!(*shown.borrow(), Some(Ok(3)));
    assert_eq!(a.view(), InstanceView::List { page: 3 });
    assert_eq!(stage.catalog.pages_requested(), vec![1, 3]);
}

#[test]
fn test_primary_follows_external_filter_change() {
    let stage = Stage::new("", 30);
    let a = stage.mount(Routable::Auto);

    stage.location.navigate_externally("#!/?q=Product%202");
    assert!(stage.router.handle_navigation());
    stage.scheduler.run_until_stalled();

    assert_eq!(
        a.store().filters().get("q").map(String::as_str),
        Some("Product 2")
    );
    assert_eq!(a.store().layout().total_items, 11);
    assert_eq!(a.current_slice()[0], Some(product(2)));
}

#[test]
fn test_primary_set_filters_writes_url() {
    let stage = Stage::new("#!/?page=2", 30);
    let a = stage.mount(Routable::Auto);

    let mut filters = Params::new();
    filters.insert("q".to_string(), "Product 2".to_string());
    spawn_result(&stage.scheduler, a.set_filters(filters));
    assert_eq!(stage.location.hash(), "#!/?q=Product%202");
    stage.scheduler.run_until_stalled();
    assert_eq!(a.view(), InstanceView::List { page: 1 });
}

#[test]
fn test_state_for_another_catalog_is_ignored() {
    let stage = Stage::new("", 40);
    let a = stage
        .coordinator
        .mount(Routable::Auto, Some("catalog-1".to_string()), stage.store());
    stage.scheduler.run_until_stalled();

    stage.location.navigate_externally("#!/catalog-2?page=2");
    stage.router.handle_navigation();
    stage.scheduler.run_until_stalled();
    assert_eq!(a.view(), InstanceView::List { page: 1 });

    stage.location.navigate_externally("#!/catalog-1?page=3");
    stage.router.handle_navigation();
    stage.scheduler.run_until_stalled();
    assert_eq!(a.view(), InstanceView::List { page: 3 });
}

#[test]
fn test_primary_writes_its_own_catalog_over_a_foreign_url() {
    let stage = Stage::new("#!/catalog-2?page=2", 40);
    let a = stage
        .coordinator
        .mount(Routable::Auto, Some("catalog-1".to_string()), stage.store());
    stage.scheduler.run_until_stalled();
    assert_eq!(a.view(), InstanceView::List { page: 1 });

    // Only the catalog id changes, so the router stays silent.
    let shown = spawn_result(&stage.scheduler, a.go_to_page(2));
    stage.scheduler.run_until_stalled();
    assert_eq!(stage.location.hash(), "#!/catalog-1?page=2");
    assert_eq!(*shown.borrow(), Some(Ok(2)));
    assert_eq!(a.view(), InstanceView::List { page: 2 });

    spawn_result(&stage.scheduler, a.go_to_page(3));
    stage.scheduler.run_until_stalled();
    assert_eq!(stage.location.hash(), "#!/catalog-1?page=3");
    assert_eq!(a.view(), InstanceView::List { page: 3 });
}

#[test]
fn test_primary_opens_product_under_its_own_catalog() {
    let stage = Stage::new("#!/catalog-2", 40);
    let a = stage
        .coordinator
        .mount(Routable::Auto, Some("catalog-1".to_string()), stage.store());
    stage.scheduler.run_until_stalled();

    a.open_product(4).unwrap();
    stage.scheduler.run_until_stalled();
    assert_eq!(stage.location.hash(), "#!/catalog-1/product-4");
    assert_eq!(
        a.view(),
        InstanceView::Product {
            slug: "product-4".to_string(),
            index: Some(4)
        }
    );

    a.back_to_list();
    stage.scheduler.run_until_stalled();
    assert_eq!(stage.location.hash(), "#!/catalog-1");
    assert_eq!(a.view(), InstanceView::List { page: 1 });
}

#[test]
fn test_unmounted_primary_no_longer_writes_url() {
    let stage = Stage::new("", 40);
    let a = stage.mount(Routable::Auto);
    stage.coordinator.unmount(&a);
    assert!(!a.is_primary());

    let c = stage.mount(Routable::Auto);
    assert!(c.is_primary());

    spawn_result(&stage.scheduler, a.go_to_page(2));
    stage.scheduler.run_until_stalled();
    assert!(stage.location.writes().is_empty());
    assert_eq!(a.view(), InstanceView::List { page: 2 });
    assert_eq!(c.view(), InstanceView::List { page: 1 });
}

#[test]
fn test_product_url_on_mount_loads_detail() {
    let stage = Stage::new("#!/product-33", 40);
    let a = stage.mount(Routable::Auto);

    assert_eq!(
        a.view(),
        InstanceView::Product {
            slug: "product-33".to_string(),
            index: None
        }
    );
    assert_eq!(stage.catalog.get_calls(), vec!["product-33"]);
    assert!(a.selected_product().is_some_and(|p| p.description.is_some()));
}

#[test]
fn test_open_target_by_id_uses_loaded_index() {
    let stage = Stage::new("", 40);
    let a = stage.mount(Routable::Auto);

    let done = spawn_result(&stage.scheduler, a.open_target(ProductTarget::Id("id-4".to_string())));
    stage.scheduler.run_until_stalled();

    assert_eq!(*done.borrow(), Some(Ok(())));
    assert_eq!(stage.location.hash(), "#!/product-4");
    assert!(stage.catalog.get_calls().iter().all(|c| c != "id-4"));
}

#[test]
fn test_primary_step_product_updates_url() {
    let stage = Stage::new("", 40);
    let a = stage.mount(Routable::Auto);
    a.open_product(11).unwrap();
    stage.scheduler.run_until_stalled();

    let stepped = spawn_result(&stage.scheduler, a.step_product(1));
    stage.scheduler.run_until_stalled();

    assert_eq!(*stepped.borrow(), Some(Ok(())));
    assert_eq!(stage.location.hash(), "#!/product-12");
    assert!(a.store().is_loaded(2));
}

// ── Secondary ──────────────────────────────────────────────────────────────

#[test]
fn test_secondary_selection_is_an_event_not_a_url() {
    let stage = Stage::new("", 40);
    let _primary = stage.mount(Routable::Auto);
    let b = stage.mount(Routable::Never);
    let writes_before = stage.location.writes().len();

    b.open_product(5).unwrap();

    assert_eq!(stage.location.writes().len(), writes_before);
    assert_eq!(
        b.view(),
        InstanceView::Product {
            slug: "product-5".to_string(),
            index: Some(5)
        }
    );
    assert_eq!(
        stage.selections(),
        vec![(
            5,
            "product-5".to_string(),
            Some("product-4".to_string()),
            Some("product-6".to_string())
        )]
    );
}

#[test]
fn test_secondary_paging_is_local() {
    let stage = Stage::new("", 40);
    let b = stage.mount(Routable::Never);

    let shown = spawn_result(&stage.scheduler, b.go_to_page(2));
    stage.scheduler.run_until_stalled();

    assert_eq!(*shown.borrow(), Some(Ok(2)));
    assert_eq!(b.view(), InstanceView::List { page: 2 });
    assert!(stage.location.writes().is_empty());
}

#[test]
fn test_secondary_step_crosses_page_boundary() {
    let stage = Stage::new("", 40);
    let b = stage.mount(Routable::Never);
    b.open_product(11).unwrap();

    let stepped = spawn_result(&stage.scheduler, b.step_product(1));
    stage.scheduler.run_until_stalled();

    assert_eq!(*stepped.borrow(), Some(Ok(())));
    assert_eq!(
        b.view(),
        InstanceView::Product {
            slug: "product-12".to_string(),
            index: Some(12)
        }
    );

    let back = spawn_result(&stage.scheduler, b.step_product(-1));
    stage.scheduler.run_until_stalled();
    assert_eq!(*back.borrow(), Some(Ok(())));
    assert_eq!(stage.selections().len(), 3);
}

#[test]
fn test_step_before_first_product_fails() {
    let stage = Stage::new("", 40);
    let b = stage.mount(Routable::Never);
    b.open_product(0).unwrap();

    let stepped = spawn_result(&stage.scheduler, b.step_product(-1));
    stage.scheduler.run_until_stalled();
    assert!(matches!(
        &*stepped.borrow(),
        Some(Err(EngineError::Invalid { .. }))
    ));
}

#[test]
fn test_secondary_open_first_and_unknown_slug() {
    let stage = Stage::new("", 40);
    let b = stage.mount(Routable::Never);

    spawn_result(&stage.scheduler, b.open_target(ProductTarget::OpenFirst));
    stage.scheduler.run_until_stalled();
    assert_eq!(stage.selections()[0].0, 0);

    let done = spawn_result(
        &stage.scheduler,
        b.open_target(ProductTarget::Slug("product-30".to_string())),
    );
    stage.scheduler.run_until_stalled();
    assert_eq!(*done.borrow(), Some(Ok(())));
    assert_eq!(
        b.view(),
        InstanceView::Product {
            slug: "product-30".to_string(),
            index: None
        }
    );
    assert_eq!(b.current_slice().len(), 12);
}

#[test]
fn test_show_product_is_silent() {
    let stage = Stage::new("", 40);
    let b = stage.mount(Routable::Never);
    let events_before = stage.events.borrow().len();

    b.show_product(product(7), None);

    assert_eq!(stage.events.borrow().len(), events_before);
    assert_eq!(
        b.view(),
        InstanceView::Product {
            slug: "product-7".to_string(),
            index: Some(7)
        }
    );
}
